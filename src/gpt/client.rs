use std::{
    fmt::{Debug, Display},
    str::FromStr,
    time::Duration,
};

use reqwest::blocking::{Client, ClientBuilder};

#[derive(Debug, PartialEq, Clone, Default, Eq)]
pub struct GptClientOption {
    base_url: Option<String>,
    proxy: Option<String>,
    no_proxy: Option<String>,
    ca_path: Option<String>,
}
impl GptClientOption {
    pub fn from_env() -> Self {
        Self {
            base_url: None,
            proxy: proxy_from_env(),
            no_proxy: no_proxy_from_env(),
            ca_path: root_ca_from_env(),
        }
    }
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

pub struct GptClient {
    key: Option<OpenAIKey>,
    model: OpenAIModel,
    url: String,
    http: Client,
}
impl GptClient {
    pub const URL: &'static str = "https://api.openai.com/v1/chat/completions";
    pub fn new(key: Option<OpenAIKey>, model: OpenAIModel, option: GptClientOption) -> Result<Self> {
        // no request timeout: a hanging endpoint blocks the caller
        let mut builder = Client::builder().timeout(None::<Duration>);
        if let Some(proxy) = option.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str()).map_err(|e| {
                GptClientError::new(e.to_string(), GptClientErrorKind::InvalidUrl(proxy.clone()))
            })?;
            let no_proxy = option.no_proxy.as_deref().and_then(reqwest::NoProxy::from_string);
            builder = builder.proxy(proxy.no_proxy(no_proxy));
        }
        if let Some(ca) = option.ca_path {
            builder = Self::add_ca(builder, &ca)?;
        }
        let http = builder
            .build()
            .map_err(|e| GptClientError::new(e.to_string(), GptClientErrorKind::BuildClientError))?;
        Ok(Self {
            key,
            model,
            url: option.base_url.unwrap_or_else(|| Self::URL.to_string()),
            http,
        })
    }
    /// Builds a client from `OPENAI_API_KEY` and the proxy / CA variables.
    ///
    /// A missing key is not an error here. It surfaces as an auth failure on the first request.
    pub fn from_env(model: OpenAIModel, option: GptClientOption) -> Result<Self> {
        let key = match OpenAIKey::from_env() {
            Ok(key) => Some(key),
            Err(e) => {
                tracing::info!(error = %e, "starting without credentials");
                None
            }
        };
        Self::new(key, model, option)
    }
    pub fn model(&self) -> &OpenAIModel {
        &self.model
    }
    pub fn request(&self, request: &ChatRequest) -> Result<Message> {
        let key = self.key.as_ref().ok_or_else(|| {
            GptClientError::new(
                "OPENAI_API_KEY is not found".to_string(),
                GptClientErrorKind::NotFoundEnvAPIKey,
            )
        })?;
        tracing::debug!(
            url = %self.url,
            model = request.model.as_str(),
            messages = request.messages.len(),
            "sending chat request"
        );
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(key.key())
            .json(request)
            .send()
            .map_err(GptClientError::from)?;
        let status = response.status();
        let body = response.text().map_err(|e| {
            GptClientError::new(
                format!("Failed to read response: {}", e),
                GptClientErrorKind::NetworkError,
            )
        })?;
        if !status.is_success() {
            return Err(GptClientError::from_status(status.as_u16(), &body));
        }
        tracing::debug!(status = status.as_u16(), bytes = body.len(), "chat response received");
        ChatCompletion::from_body(&body)?.into_message()
    }
    fn add_ca(builder: ClientBuilder, ca: &str) -> Result<ClientBuilder> {
        let pem = std::fs::read(ca).map_err(|e| Self::ca_error(ca, e))?;
        let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| Self::ca_error(ca, e))?;
        Ok(builder.add_root_certificate(cert))
    }
    fn ca_error(ca: &str, e: impl Display) -> GptClientError {
        GptClientError::new(
            e.to_string(),
            GptClientErrorKind::NotFoundCAFile(ca.to_string()),
        )
    }
}

fn root_ca_from_env() -> Option<String> {
    ["CA_BUNDLE", "ca_bundle"]
        .into_iter()
        .find_map(|name| std::env::var(name).ok())
}

fn no_proxy_from_env() -> Option<String> {
    ["NO_PROXY", "no_proxy"]
        .into_iter()
        .find_map(|name| std::env::var(name).ok())
}

fn proxy_from_env() -> Option<String> {
    ["HTTPS_PROXY", "https_proxy", "HTTP_PROXY", "http_proxy"]
        .into_iter()
        .find_map(|name| std::env::var(name).ok())
}

#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct ChatCompletion {
    choices: Vec<ChatCompletionChoice>,
}
impl ChatCompletion {
    fn from_body(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| {
            GptClientError::new(
                format!("Failed to parse chat response: {}", e),
                GptClientErrorKind::ParseError,
            )
        })
    }
    fn into_message(mut self) -> Result<Message> {
        if self.choices.is_empty() {
            return Err(GptClientError::new(
                "response has no choices".to_string(),
                GptClientErrorKind::ParseError,
            ));
        }
        let choice = self.choices.swap_remove(0);
        Ok(Message::assistant(choice.message.content.unwrap_or_default()))
    }
}
#[derive(Debug, Clone, serde::Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}
#[derive(Debug, Clone, serde::Deserialize)]
struct ChatCompletionMessage {
    content: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorBody,
}
#[derive(Debug, serde::Deserialize)]
struct OpenAIErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct OpenAIKey(String);

impl OpenAIKey {
    pub fn from_env() -> Result<Self> {
        Ok(Self(std::env::var("OPENAI_API_KEY").map_err(|_| {
            GptClientError::new(
                "OPENAI_API_KEY is not found".to_string(),
                GptClientErrorKind::NotFoundEnvAPIKey,
            )
        })?))
    }
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
    fn key(&self) -> &str {
        self.0.as_str()
    }
}
impl Debug for OpenAIKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", "x".repeat(self.0.len()))
    }
}
impl Display for OpenAIKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", "x".repeat(self.0.len()))
    }
}

#[derive(Debug, Clone, serde::Serialize, PartialEq, Eq)]
pub struct ChatRequest {
    model: OpenAIModel,
    messages: Vec<Message>,
    stream: bool,
}
impl ChatRequest {
    pub fn new(model: OpenAIModel, messages: Vec<Message>) -> Self {
        Self {
            model,
            messages,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: String,
}
impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
    pub fn role(&self) -> Role {
        self.role
    }
    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Debug, Clone, Copy, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
    Assistant,
}
impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Assistant => "assistant",
        }
    }
}
impl serde::Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OpenAIModel {
    #[default]
    Gpt4oMini,
    Gpt4o,
    Gpt4,
    Gpt3Dot5Turbo,
    Other(String),
}
impl serde::Serialize for OpenAIModel {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
impl OpenAIModel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Gpt4oMini => "gpt-4o-mini",
            Self::Gpt4o => "gpt-4o",
            Self::Gpt4 => "gpt-4",
            Self::Gpt3Dot5Turbo => "gpt-3.5-turbo",
            Self::Other(name) => name.as_str(),
        }
    }
}
impl Display for OpenAIModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
impl FromStr for OpenAIModel {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" => Err("model identifier is empty".to_string()),
            "gpt-4o-mini" | "4o-mini" => Ok(Self::Gpt4oMini),
            "gpt-4o" | "4o" => Ok(Self::Gpt4o),
            "gpt-4" | "gpt4" | "4" => Ok(Self::Gpt4),
            "gpt-3.5-turbo" | "gpt3" | "3" => Ok(Self::Gpt3Dot5Turbo),
            other => Ok(Self::Other(other.to_string())),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
#[error("{kind} : {message}")]
pub struct GptClientError {
    message: String,
    pub kind: GptClientErrorKind,
}
impl GptClientError {
    pub fn new(message: String, kind: GptClientErrorKind) -> Self {
        Self { message, kind }
    }
    pub fn message(&self) -> &str {
        &self.message
    }
    fn from_status(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<OpenAIErrorResponse>(body)
            .map(|res| res.error.message)
            .unwrap_or_else(|_| body.to_string());
        let kind = match status {
            401 | 403 => GptClientErrorKind::AuthError,
            429 => GptClientErrorKind::RateLimited,
            400 | 404 | 422 => GptClientErrorKind::InvalidRequest,
            500..=599 => GptClientErrorKind::ServerError(status),
            _ => GptClientErrorKind::ResponseError(status),
        };
        Self::new(message, kind)
    }
}
impl From<reqwest::Error> for GptClientError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() || e.is_connect() {
            GptClientErrorKind::NetworkError
        } else if e.is_builder() {
            GptClientErrorKind::InvalidUrl(
                e.url().map(|url| url.to_string()).unwrap_or_default(),
            )
        } else {
            GptClientErrorKind::RequestError
        };
        Self::new(e.to_string(), kind)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum GptClientErrorKind {
    #[error("Not found CA File. File is : {0}")]
    NotFoundCAFile(String),
    #[error("Invalid Url. Url is : {0}")]
    InvalidUrl(String),
    #[error("Not found OPENAI_API_KEY in env")]
    NotFoundEnvAPIKey,
    #[error("Could not build http client")]
    BuildClientError,
    #[error("Network Error")]
    NetworkError,
    #[error("Request Error")]
    RequestError,
    #[error("Authentication failed")]
    AuthError,
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Invalid request")]
    InvalidRequest,
    #[error("Server Error. Status is : {0}")]
    ServerError(u16),
    #[error("Response Error. Status is : {0}")]
    ResponseError(u16),
    #[error("Parse Error")]
    ParseError,
}
impl GptClientErrorKind {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthError | Self::NotFoundEnvAPIKey)
    }
}
pub type Result<T> = std::result::Result<T, GptClientError>;

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;

    #[test]
    #[ignore = "実際に通信するので、CIでのテストは行わない"]
    fn gptと実際の通信を行うことが可能() {
        let client = GptClient::from_env(OpenAIModel::default(), GptClientOption::from_env())
            .unwrap();

        let result = client
            .request(&ChatRequest::new(
                client.model().clone(),
                vec![Message::user("hello")],
            ))
            .unwrap();

        assert_eq!(result.role(), Role::Assistant);
        assert!(result.content().len() > 0);
    }
    #[test]
    fn keyが無い場合は最初のリクエストで認証エラーになる() {
        let client =
            GptClient::new(None, OpenAIModel::default(), GptClientOption::default()).unwrap();

        let err = client
            .request(&ChatRequest::new(
                OpenAIModel::default(),
                vec![Message::user("hello")],
            ))
            .unwrap_err();

        assert_eq!(err.kind, GptClientErrorKind::NotFoundEnvAPIKey);
        assert!(err.kind.is_auth());
    }
    #[test]
    fn 存在しないcaファイルを指定するとエラーになる() {
        let option = GptClientOption {
            ca_path: Some("not/exist/ca.pem".to_string()),
            ..Default::default()
        };

        let result = GptClient::new(None, OpenAIModel::default(), option);

        assert!(matches!(
            result.map(|_| ()).unwrap_err().kind,
            GptClientErrorKind::NotFoundCAFile(path) if path == "not/exist/ca.pem"
        ));
    }
    #[test]
    fn base_urlを指定しない場合はopenaiのurlを利用する() {
        let client =
            GptClient::new(None, OpenAIModel::default(), GptClientOption::default()).unwrap();
        assert_eq!(client.url, GptClient::URL);

        let client = GptClient::new(
            None,
            OpenAIModel::default(),
            GptClientOption::default().with_base_url("http://localhost:8080/v1/chat/completions"),
        )
        .unwrap();
        assert_eq!(client.url, "http://localhost:8080/v1/chat/completions");
    }
    #[test]
    fn chat_requestはopenaiのjson形式に変換できる() {
        let request = ChatRequest::new(
            OpenAIModel::Gpt4oMini,
            vec![Message::system("be kind"), Message::user("hello")],
        );

        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "be kind" },
                    { "role": "user", "content": "hello" },
                ],
                "stream": false,
            })
        );
    }
    #[test]
    fn gptのレスポンスからassistantのmessageを取り出せる() {
        let message = ChatCompletion::from_body(&make_chat_completion_json("Hello World"))
            .unwrap()
            .into_message()
            .unwrap();

        assert_eq!(message, Message::assistant("Hello World"));
    }
    #[test]
    fn contentがnullのレスポンスは空文字のmessageになる() {
        let body = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":null}}]}"#;

        let message = ChatCompletion::from_body(body)
            .unwrap()
            .into_message()
            .unwrap();

        assert_eq!(message.content(), "");
    }
    #[test]
    fn 不正なレスポンスはparse_errorになる() {
        let err = ChatCompletion::from_body("not json").unwrap_err();
        assert_eq!(err.kind, GptClientErrorKind::ParseError);

        let err = ChatCompletion::from_body(r#"{"choices":[]}"#)
            .unwrap()
            .into_message()
            .unwrap_err();
        assert_eq!(err.kind, GptClientErrorKind::ParseError);
    }
    #[test]
    fn http_statusからエラーの種類を判定できる() {
        let body = make_error_json("Incorrect API key provided");

        let err = GptClientError::from_status(401, &body);
        assert_eq!(err.kind, GptClientErrorKind::AuthError);
        assert_eq!(err.message(), "Incorrect API key provided");

        assert_eq!(
            GptClientError::from_status(429, &body).kind,
            GptClientErrorKind::RateLimited
        );
        assert_eq!(
            GptClientError::from_status(400, &body).kind,
            GptClientErrorKind::InvalidRequest
        );
        assert_eq!(
            GptClientError::from_status(503, &body).kind,
            GptClientErrorKind::ServerError(503)
        );
        assert_eq!(
            GptClientError::from_status(302, "moved").kind,
            GptClientErrorKind::ResponseError(302)
        );
    }
    #[test]
    fn エラーのbodyがjsonでない場合はbodyをそのままmessageにする() {
        let err = GptClientError::from_status(502, "<html>bad gateway</html>");
        assert_eq!(err.message(), "<html>bad gateway</html>");
    }
    #[test]
    fn gptへbearer認証付きでhistoryを送りassistantの返答を受け取れる() {
        let server = FakeServer::respond_once("200 OK", &make_chat_completion_json("hi"));
        let client = GptClient::new(
            Some(OpenAIKey::new("sk-test")),
            OpenAIModel::Gpt4oMini,
            GptClientOption::default().with_base_url(server.url()),
        )
        .unwrap();

        let reply = client
            .request(&ChatRequest::new(
                OpenAIModel::Gpt4oMini,
                vec![Message::user("hello")],
            ))
            .unwrap();

        assert_eq!(reply, Message::assistant("hi"));
        let request = server.received();
        assert!(request.starts_with("POST /v1/chat/completions "));
        assert!(request
            .to_ascii_lowercase()
            .contains("authorization: bearer sk-test\r\n"));
        let body: serde_json::Value =
            serde_json::from_str(request.split("\r\n\r\n").nth(1).unwrap()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [{ "role": "user", "content": "hello" }],
                "stream": false,
            })
        );
    }
    #[test]
    fn 認証に失敗した場合はエラーのmessageを持つauth_errorになる() {
        let server = FakeServer::respond_once("401 Unauthorized", &make_error_json("bad key"));
        let client = GptClient::new(
            Some(OpenAIKey::new("sk-wrong")),
            OpenAIModel::default(),
            GptClientOption::default().with_base_url(server.url()),
        )
        .unwrap();

        let err = client
            .request(&ChatRequest::new(
                OpenAIModel::default(),
                vec![Message::user("hello")],
            ))
            .unwrap_err();

        assert_eq!(err.kind, GptClientErrorKind::AuthError);
        assert_eq!(err.message(), "bad key");
        server.received();
    }
    #[test]
    fn no_proxyに含まれる宛先へはproxyを経由せずに接続する() {
        let server = FakeServer::respond_once("200 OK", &make_chat_completion_json("direct"));
        let option = GptClientOption {
            proxy: Some("http://127.0.0.1:9".to_string()),
            no_proxy: Some("127.0.0.1,localhost".to_string()),
            ..Default::default()
        }
        .with_base_url(server.url());
        let client = GptClient::new(Some(OpenAIKey::new("sk-test")), OpenAIModel::default(), option)
            .unwrap();

        let reply = client
            .request(&ChatRequest::new(
                OpenAIModel::default(),
                vec![Message::user("hello")],
            ))
            .unwrap();

        assert_eq!(reply.content(), "direct");
        server.received();
    }
    #[test]
    fn modelは別名からも指定できる() {
        assert_eq!("4o-mini".parse(), Ok(OpenAIModel::Gpt4oMini));
        assert_eq!("gpt4".parse(), Ok(OpenAIModel::Gpt4));
        assert_eq!("3".parse(), Ok(OpenAIModel::Gpt3Dot5Turbo));
        assert_eq!(
            "o3-mini".parse(),
            Ok(OpenAIModel::Other("o3-mini".to_string()))
        );
        assert!(" ".parse::<OpenAIModel>().is_err());
    }
    #[test]
    fn keyは表示時に伏せ字になる() {
        let key = OpenAIKey::new("sk-abc");
        assert_eq!(format!("{}", key), "xxxxxx");
        assert_eq!(format!("{:?}", key), "xxxxxx");
    }
    #[test]
    fn roleは小文字でserializeされる() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), r#""assistant""#);
        assert_eq!(
            serde_json::from_str::<Role>(r#""system""#).unwrap(),
            Role::System
        );
    }
}
