//! MCP surface.
//!
//! Translates rmcp requests into registry dispatches and maps results back.

use std::sync::Arc;

use rmcp::{
    handler::server::ServerHandler,
    model::*,
    service::RequestContext,
    ErrorData as McpError, RoleServer,
};

use crate::error::GatewayError;
use crate::lifecycle::LifecycleContext;
use crate::registry::{Arguments, OperationDescriptor, OperationKind, Registry};

const TEXT_MIME: &str = "text/plain";

/// PostgreSQL MCP gateway.
///
/// Cheap to clone; every clone shares the registry and the connection.
#[derive(Clone)]
pub struct PostgresServer {
    registry: Arc<Registry>,
    context: LifecycleContext,
}

impl PostgresServer {
    pub fn new(registry: Arc<Registry>, context: LifecycleContext) -> Self {
        Self { registry, context }
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.registry
            .descriptors(OperationKind::Tool)
            .map(|d| Tool::new(d.name.clone(), d.description.clone(), Arc::new(d.input_schema.clone())))
            .collect()
    }

    pub fn resource_templates(&self) -> Vec<ResourceTemplate> {
        self.registry
            .descriptors(OperationKind::Resource)
            .map(|d| {
                RawResourceTemplate {
                    uri_template: d.name.clone(),
                    name: resource_name(d),
                    title: None,
                    description: Some(d.description.clone()),
                    mime_type: Some(TEXT_MIME.to_string()),
                }
                .no_annotation()
            })
            .collect()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.registry
            .descriptors(OperationKind::Prompt)
            .map(|d| {
                let arguments = d
                    .params
                    .iter()
                    .map(|p| PromptArgument {
                        name: p.name.clone(),
                        title: None,
                        description: p.description.clone(),
                        required: Some(p.required),
                    })
                    .collect();
                Prompt::new(d.name.clone(), Some(d.description.clone()), Some(arguments))
            })
            .collect()
    }

    /// Run a tool. Bad arguments and unknown tools are protocol errors; any
    /// other failure comes back as an error result.
    pub async fn call(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult, McpError> {
        let args = Arguments::from_json(name, arguments)?;

        match self
            .registry
            .dispatch(&self.context, OperationKind::Tool, name, args)
            .await
        {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e @ (GatewayError::Validation { .. } | GatewayError::NotFound { .. })) => Err(e.into()),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "Tool failed");
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
        }
    }

    pub async fn read(&self, uri: &str) -> Result<ReadResourceResult, McpError> {
        let (descriptor, args) = self.registry.resolve_resource(uri)?;
        let text = self
            .registry
            .dispatch(&self.context, OperationKind::Resource, &descriptor.name, args)
            .await
            .inspect_err(|e| tracing::warn!(uri, error = %e, "Resource read failed"))?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        })
    }

    pub async fn prompt(&self, name: &str, arguments: Option<JsonObject>) -> Result<GetPromptResult, McpError> {
        let args = Arguments::from_json(name, arguments)?;
        let text = self
            .registry
            .dispatch(&self.context, OperationKind::Prompt, name, args)
            .await?;

        Ok(GetPromptResult {
            description: self
                .registry
                .descriptor(OperationKind::Prompt, name)
                .map(|d| d.description.clone()),
            messages: vec![PromptMessage::new_text(PromptMessageRole::User, text)],
        })
    }
}

/// `pgschema://{table}` is listed as `pgschema`.
fn resource_name(descriptor: &OperationDescriptor) -> String {
    descriptor
        .name
        .split_once("://")
        .map(|(scheme, _)| scheme.to_string())
        .unwrap_or_else(|| descriptor.name.clone())
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

impl ServerHandler for PostgresServer {
    fn get_info(&self) -> ServerInfo {
        InitializeResult {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            server_info: Implementation {
                name: "rmcp-pg-gateway".to_string(),
                title: Some("Postgres MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read table columns from pgschema://{table}, run read-only SELECT queries with run_sql, \
                 and use the summarize_table / find_trends prompts for analysis."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(self.tools()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.call(&request.name, request.arguments).await
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult::with_all_items(self.resource_templates()))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        self.read(&request.uri).await
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult::with_all_items(self.prompts()))
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        self.prompt(&request.name, request.arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::FakeConnection;
    use crate::connection::{Connection, Row};
    use crate::gate::REJECTION_MESSAGE;
    use crate::handlers;
    use serde_json::json;

    fn server(conn: FakeConnection) -> (PostgresServer, Arc<FakeConnection>) {
        let conn = Arc::new(conn);
        let registry = Arc::new(handlers::registry().unwrap());
        (
            PostgresServer::new(registry, LifecycleContext::new(conn.clone())),
            conn,
        )
    }

    fn object(value: serde_json::Value) -> Option<JsonObject> {
        value.as_object().cloned()
    }

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect()
    }

    #[test]
    fn test_server_info() {
        let (server, _) = server(FakeConnection::returning(vec![]));
        let info = server.get_info();
        assert_eq!(info.server_info.name, "rmcp-pg-gateway");
        assert_eq!(info.server_info.title.as_deref(), Some("Postgres MCP Server"));
        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.resources.is_some());
        assert!(info.capabilities.prompts.is_some());
    }

    #[test]
    fn test_listings_come_from_registry() {
        let (server, _) = server(FakeConnection::returning(vec![]));

        let tools = server.tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "run_sql");
        assert_eq!(tools[0].input_schema["required"], json!(["query"]));

        let templates = server.resource_templates();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].uri_template, "pgschema://{table}");
        assert_eq!(templates[0].name, "pgschema");

        let prompts = server.prompts();
        let names: Vec<_> = prompts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["summarize_table", "find_trends"]);
        let args: Vec<_> = prompts[1]
            .arguments
            .as_ref()
            .unwrap()
            .iter()
            .map(|a| (a.name.as_str(), a.required))
            .collect();
        assert_eq!(args, vec![("column", Some(true)), ("table", Some(true))]);
    }

    #[tokio::test]
    async fn test_call_run_sql() {
        let (server, conn) = server(FakeConnection::returning(vec![Row::new().with("?column?", 1)]));

        let result = server
            .call("run_sql", object(json!({ "query": "SELECT 1" })))
            .await
            .unwrap();

        assert_ne!(result.is_error, Some(true));
        assert_eq!(text_of(&result), r#"{"?column?": 1}"#);
        assert_eq!(conn.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_call_run_sql_rejection_is_text() {
        let (server, conn) = server(FakeConnection::returning(vec![]));
        let result = server
            .call("run_sql", object(json!({ "query": "delete from t" })))
            .await
            .unwrap();
        assert_eq!(text_of(&result), REJECTION_MESSAGE);
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn test_call_missing_argument_is_invalid_params() {
        let (server, conn) = server(FakeConnection::returning(vec![]));
        let err = server.call("run_sql", object(json!({}))).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = server.call("run_sql", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = server
            .call("run_sql", object(json!({ "query": 1 })))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(conn.calls().is_empty());
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let (server, _) = server(FakeConnection::returning(vec![]));
        let err = server.call("drop_everything", None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_read_schema_resource() {
        let (server, _) = server(FakeConnection::returning(vec![
            Row::new().with("column_name", "id").with("data_type", "integer"),
            Row::new().with("column_name", "name").with("data_type", "text"),
        ]));

        let result = server.read("pgschema://users").await.unwrap();
        assert_eq!(result.contents.len(), 1);
        match &result.contents[0] {
            ResourceContents::TextResourceContents { uri, text, .. } => {
                assert_eq!(uri, "pgschema://users");
                assert_eq!(text, "id (integer)\nname (text)");
            }
            other => panic!("unexpected contents: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_unknown_resource() {
        let (server, _) = server(FakeConnection::returning(vec![]));
        let err = server.read("mysql://tables/users").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_read_with_dropped_connection_is_an_error_response() {
        let (server, conn) = server(FakeConnection::returning(vec![]));
        conn.close().await;
        let err = server.read("pgschema://users").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_get_prompt() {
        let (server, conn) = server(FakeConnection::returning(vec![]));

        let result = server
            .prompt("summarize_table", object(json!({ "table": "orders" })))
            .await
            .unwrap();

        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, PromptMessageRole::User);
        match &result.messages[0].content {
            PromptMessageContent::Text { text } => assert_eq!(
                text,
                "What are the most important insights in the `orders` table?"
            ),
            other => panic!("unexpected content: {other:?}"),
        }
        assert!(conn.calls().is_empty());

        let err = server.prompt("find_trends", object(json!({ "table": "orders" }))).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
    }
}
