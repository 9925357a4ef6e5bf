//! HTTP query engine speaking the Athena JSON 1.1 protocol.
//!
//! Every operation is a `POST` to the endpoint root with an
//! `X-Amz-Target: AmazonAthena.<Operation>` header and a JSON body. Request
//! signing is left to a proxy in front of the endpoint; an optional bearer
//! token is forwarded on every call.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::fmt;
use std::time::Duration;
use url::Url;

use super::{ExecutionContext, ExecutionId, ExecutionStatus, QueryEngine, QueryState, ResultPage, Row};
use crate::config::QueryEngineConfig;
use crate::error::{
    ApiSnafu, HttpClientSnafu, InvalidEndpointSnafu, QueryError, RequestSnafu,
    ResponseDecodeSnafu,
};

const TARGET_PREFIX: &str = "AmazonAthena";
const JSON_1_1: &str = "application/x-amz-json-1.1";

const START_QUERY_EXECUTION: &str = "StartQueryExecution";
const GET_QUERY_EXECUTION: &str = "GetQueryExecution";
const GET_QUERY_RESULTS: &str = "GetQueryResults";

/// Query engine client for an Athena-compatible endpoint.
#[derive(Clone)]
pub struct AthenaEngine {
    endpoint: Url,
    auth_token: Option<String>,
    http_client: reqwest::Client,
}

impl fmt::Debug for AthenaEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AthenaEngine")
            .field("endpoint", &self.endpoint.as_str())
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AthenaEngine {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, QueryError> {
        let endpoint = Url::parse(endpoint).context(InvalidEndpointSnafu)?;
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context(HttpClientSnafu)?;

        Ok(Self {
            endpoint,
            auth_token: None,
            http_client,
        })
    }

    /// Set the `Bearer` token sent with each request.
    pub fn with_auth_token(mut self, auth_token: impl Into<String>) -> Self {
        self.auth_token = Some(auth_token.into());
        self
    }

    pub fn from_config(config: &QueryEngineConfig) -> Result<Self, QueryError> {
        let engine = Self::new(
            &config.endpoint,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(match config.auth_token.as_deref() {
            Some(token) if !token.is_empty() => engine.with_auth_token(token),
            _ => engine,
        })
    }

    async fn call<Req, Resp>(&self, operation: &'static str, body: &Req) -> Result<Resp, QueryError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut req = self
            .http_client
            .post(self.endpoint.clone())
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(CONTENT_TYPE, JSON_1_1)
            .json(body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await.context(RequestSnafu { operation })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let (error_type, message) = parse_error_body(&text);
            return ApiSnafu {
                operation,
                status: status.as_u16(),
                error_type,
                message,
            }
            .fail();
        }

        resp.json().await.context(ResponseDecodeSnafu { operation })
    }
}

/// Split an error body into its exception type and message.
fn parse_error_body(text: &str) -> (String, String) {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => {
            let error_type = body
                .error_type
                .as_deref()
                .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
                .unwrap_or_else(|| "UnknownError".to_string());
            let message = body.message.or(body.message_lower).unwrap_or_default();
            (error_type, message)
        }
        Err(_) => ("UnknownError".to_string(), text.to_string()),
    }
}

#[async_trait]
impl QueryEngine for AthenaEngine {
    async fn start_execution(
        &self,
        query: &str,
        context: &ExecutionContext,
    ) -> Result<ExecutionId, QueryError> {
        let request = StartQueryExecutionRequest {
            query_string: query,
            query_execution_context: QueryExecutionContext {
                database: &context.database,
            },
            result_configuration: ResultConfiguration {
                output_location: &context.output_location,
            },
            work_group: context.workgroup.as_deref(),
        };

        let response: StartQueryExecutionResponse =
            self.call(START_QUERY_EXECUTION, &request).await?;
        Ok(ExecutionId::new(response.query_execution_id))
    }

    async fn get_execution_status(&self, id: &ExecutionId) -> Result<ExecutionStatus, QueryError> {
        let request = QueryExecutionIdRequest {
            query_execution_id: id.as_str(),
            next_token: None,
        };

        let response: GetQueryExecutionResponse = self.call(GET_QUERY_EXECUTION, &request).await?;
        let status = response.query_execution.status;
        Ok(ExecutionStatus {
            state: QueryState::parse(&status.state),
            reason: status.state_change_reason,
        })
    }

    async fn get_execution_results(
        &self,
        id: &ExecutionId,
        next_token: Option<&str>,
    ) -> Result<ResultPage, QueryError> {
        let request = QueryExecutionIdRequest {
            query_execution_id: id.as_str(),
            next_token,
        };

        let response: GetQueryResultsResponse = self.call(GET_QUERY_RESULTS, &request).await?;
        let rows = response
            .result_set
            .rows
            .into_iter()
            .map(|row| {
                row.data
                    .into_iter()
                    .map(|datum| datum.var_char_value.unwrap_or_default())
                    .collect::<Row>()
            })
            .collect();

        Ok(ResultPage {
            rows,
            next_token: response.next_token,
        })
    }
}

// ============ Wire types ============

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartQueryExecutionRequest<'a> {
    query_string: &'a str,
    query_execution_context: QueryExecutionContext<'a>,
    result_configuration: ResultConfiguration<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    work_group: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionContext<'a> {
    database: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ResultConfiguration<'a> {
    output_location: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartQueryExecutionResponse {
    query_execution_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionIdRequest<'a> {
    query_execution_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_token: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryExecutionResponse {
    query_execution: QueryExecution,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecution {
    status: QueryExecutionStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryExecutionStatus {
    state: String,
    #[serde(default)]
    state_change_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryResultsResponse {
    result_set: ResultSet,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultSet {
    #[serde(default)]
    rows: Vec<ResultRow>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultRow {
    #[serde(default)]
    data: Vec<Datum>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Datum {
    #[serde(default)]
    var_char_value: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    error_type: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "message")]
    message_lower: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext {
            database: "default".to_string(),
            output_location: "s3://enriched/athena-query-results/".to_string(),
            workgroup: Some("analytics".to_string()),
        }
    }

    fn engine(url: String) -> AthenaEngine {
        AthenaEngine::new(&url, Duration::from_secs(5)).expect("create engine")
    }

    #[tokio::test]
    async fn start_execution() {
        let token = "proxy-token";
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-amz-target", "AmazonAthena.StartQueryExecution")
            .match_header("content-type", JSON_1_1)
            .match_header("authorization", format!("Bearer {token}").as_str())
            .match_body(Matcher::Json(json!({
                "QueryString": "SELECT 1",
                "QueryExecutionContext": {"Database": "default"},
                "ResultConfiguration": {"OutputLocation": "s3://enriched/athena-query-results/"},
                "WorkGroup": "analytics"
            })))
            .with_status(200)
            .with_header("content-type", JSON_1_1)
            .with_body(r#"{"QueryExecutionId": "abc-123"}"#)
            .create_async()
            .await;

        let id = engine(server.url())
            .with_auth_token(token)
            .start_execution("SELECT 1", &context())
            .await
            .expect("start execution");

        assert_eq!(id.as_str(), "abc-123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_execution_status() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-amz-target", "AmazonAthena.GetQueryExecution")
            .match_body(Matcher::Json(json!({"QueryExecutionId": "abc-123"})))
            .with_status(200)
            .with_body(
                json!({
                    "QueryExecution": {
                        "QueryExecutionId": "abc-123",
                        "Status": {
                            "State": "FAILED",
                            "StateChangeReason": "Table not found"
                        }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let status = engine(server.url())
            .get_execution_status(&ExecutionId::new("abc-123"))
            .await
            .expect("get status");

        assert_eq!(status.state, QueryState::Failed);
        assert_eq!(status.reason.as_deref(), Some("Table not found"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_execution_results_page() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("x-amz-target", "AmazonAthena.GetQueryResults")
            .match_body(Matcher::Json(
                json!({"QueryExecutionId": "abc-123", "NextToken": "page-2"}),
            ))
            .with_status(200)
            .with_body(
                json!({
                    "ResultSet": {
                        "Rows": [
                            {"Data": [{"VarCharValue": "tab_name"}]},
                            {"Data": [{"VarCharValue": "telegram"}, {}]}
                        ]
                    },
                    "NextToken": "page-3"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let page = engine(server.url())
            .get_execution_results(&ExecutionId::new("abc-123"), Some("page-2"))
            .await
            .expect("get results");

        assert_eq!(
            page.rows,
            vec![
                vec!["tab_name".to_string()],
                vec!["telegram".to_string(), String::new()],
            ]
        );
        assert_eq!(page.next_token.as_deref(), Some("page-3"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_is_surfaced() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(400)
            .with_body(
                json!({
                    "__type": "com.amazonaws.athena#InvalidRequestException",
                    "Message": "line 1:8: mismatched input"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let err = engine(server.url())
            .start_execution("SELEC 1", &context())
            .await
            .unwrap_err();

        match &err {
            QueryError::Api {
                operation,
                status,
                error_type,
                message,
            } => {
                assert_eq!(*operation, START_QUERY_EXECUTION);
                assert_eq!(*status, 400);
                assert_eq!(error_type, "InvalidRequestException");
                assert_eq!(message, "line 1:8: mismatched input");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        assert!(err.is_upstream());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_response_is_decode_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"Unexpected": true}"#)
            .create_async()
            .await;

        let err = engine(server.url())
            .start_execution("SELECT 1", &context())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::ResponseDecode { .. }));
    }

    #[test]
    fn invalid_endpoint_rejected() {
        let err = AthenaEngine::new("not a url", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, QueryError::InvalidEndpoint { .. }));
    }

    #[test]
    fn error_body_without_json() {
        assert_eq!(
            parse_error_body("Service Unavailable"),
            ("UnknownError".to_string(), "Service Unavailable".to_string())
        );
    }
}
