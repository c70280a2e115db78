//! Project management tools
//!
//! Thin pass-throughs to the backend API built on [`ApiClient`]. Every tool
//! returns a [`ToolResponse`]; failures are rendered as text so a broken
//! call never takes the MCP session down with it.
//!
//! Account-level tools (projects, keys) act with the session's user token.
//! Project-scoped tools ([`resources`]) act with the secret key of the
//! project picked by `select-project`.

mod keys;
mod projects;
mod resources;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::api::{ApiClient, ToolResponse};
use crate::credential::SharedCredential;
use crate::{Error, Result};

/// Project selected for key tools
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSelection {
    /// Selected project id
    pub active_project: Option<String>,
    /// Secret key of that project
    pub api_secret: Option<String>,
}

/// Per-session tool state
#[derive(Debug)]
pub struct ToolSession {
    credential: Arc<SharedCredential>,
    selection: RwLock<ProjectSelection>,
}

impl ToolSession {
    /// Start a session on `credential` with nothing selected
    #[must_use]
    pub fn new(credential: Arc<SharedCredential>) -> Self {
        Self {
            credential,
            selection: RwLock::new(ProjectSelection::default()),
        }
    }

    /// The session's credential cell
    #[must_use]
    pub fn credential(&self) -> &SharedCredential {
        &self.credential
    }

    /// Current selection
    #[must_use]
    pub fn selection(&self) -> ProjectSelection {
        self.selection.read().clone()
    }

    fn active_project(&self) -> Option<String> {
        self.selection.read().active_project.clone()
    }

    fn api_secret(&self) -> Option<String> {
        self.selection.read().api_secret.clone()
    }

    fn select(&self, selection: ProjectSelection) {
        *self.selection.write() = selection;
    }
}

/// Tool advertised to MCP clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Tool name
    pub name: &'static str,
    /// What the tool does
    pub description: &'static str,
    /// JSON schema of the arguments
    pub input_schema: Value,
}

/// Key-custody service registering shield keys
pub const DEFAULT_SHIELD_URL: &str = "https://shield.openfort.io";

/// The project management toolbox
#[derive(Clone)]
pub struct Toolbox {
    api: ApiClient,
    shield_url: String,
}

impl Toolbox {
    /// Create a toolbox calling the backend through `api`
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            shield_url: DEFAULT_SHIELD_URL.to_string(),
        }
    }

    /// Register shield keys at `url` instead of the hosted service
    #[must_use]
    pub fn with_shield_url(mut self, url: &str) -> Self {
        self.shield_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Run tool `name` for `session`
    pub async fn call(&self, session: &ToolSession, name: &str, args: &Value) -> ToolResponse {
        debug!(tool = %name, "Tool call");
        let result = match name {
            "list-projects" => self.list_projects(session).await,
            "get-project" => match required_str(args, "projectId") {
                Ok(id) => self.get_project(session, id).await,
                Err(e) => Err(e),
            },
            "create-project" => match required_str(args, "name") {
                Ok(project_name) => self.create_project(session, project_name).await,
                Err(e) => Err(e),
            },
            "select-project" => match required_str(args, "projectId") {
                Ok(id) => Ok(self.select_project(session, id).await),
                Err(e) => Err(e),
            },
            "show-selected-project" => Ok(Self::show_selected_project(session)),
            "deselect-project" => Ok(Self::deselect_project(session)),
            "get-publishable-keys" => Ok(self.get_publishable_keys(session).await),
            "get-secret-keys" => Ok(self.get_secret_keys(session).await),
            "get-shield-publishable-key" => Ok(self.get_shield_publishable_key(session).await),
            "get-shield-secret-key" => Ok(self.get_shield_secret_key(session).await),
            "create-publishable-key" => Ok(self.create_publishable_key(session).await),
            "create-secret-key" => Ok(self.create_secret_key(session).await),
            "create-shield-keys" => Ok(self.create_shield_keys(session).await),
            other => self
                .call_resource(session, other, args)
                .await
                .ok_or_else(|| Error::InvalidRequest(format!("Unknown tool: {other}"))),
        };

        result.unwrap_or_else(|e| ToolResponse::text(e.to_string()))
    }
}

/// Definitions of every tool [`Toolbox::call`] accepts
#[must_use]
pub fn definitions() -> Vec<ToolDefinition> {
    let no_args = || json!({"type": "object", "properties": {}, "required": []});
    let project_id = |description: &str| {
        json!({
            "type": "object",
            "properties": {"projectId": {"type": "string", "description": description}},
            "required": ["projectId"]
        })
    };

    vec![
        ToolDefinition {
            name: "list-projects",
            description: "Lists all the user's projects",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "get-project",
            description: "Get a project by ID",
            input_schema: project_id("The unique identifier of the project to retrieve"),
        },
        ToolDefinition {
            name: "create-project",
            description: "Creates a new project",
            input_schema: json!({
                "type": "object",
                "properties": {"name": {"type": "string", "minLength": 1, "description": "The name of the new project to create"}},
                "required": ["name"]
            }),
        },
        ToolDefinition {
            name: "select-project",
            description: "Selects a project based on its ID, sets it as active and stores its secret API key for further calls.",
            input_schema: project_id("The unique identifier of the project to select and activate"),
        },
        ToolDefinition {
            name: "show-selected-project",
            description: "Displays the currently selected project and stored API secret.",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "deselect-project",
            description: "Clears the active project and associated API secret.",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "get-publishable-keys",
            description: "Get the publishable keys of the active project",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "get-secret-keys",
            description: "Get the secret keys of the active project",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "get-shield-publishable-key",
            description: "Get the shield publishable key of the active project",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "get-shield-secret-key",
            description: "Get the shield secret key of the active project",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "create-publishable-key",
            description: "Create a new publishable key for the active project and return all the existing ones",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "create-secret-key",
            description: "Create a new secret key for the active project and return all the existing ones",
            input_schema: no_args(),
        },
        ToolDefinition {
            name: "create-shield-keys",
            description: "Create new shield keys for the active project and return the public, secret and encryption keys. The encryption key is never shown again, make the user copy it.",
            input_schema: no_args(),
        },
    ]
    .into_iter()
    .chain(resources::definitions())
    .collect()
}

fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::InvalidRequest(format!("Missing '{key}' parameter")))
}

/// Tokens of the project's API keys named `name`
fn keys_named<'a>(project: &'a Value, name: &str) -> Vec<&'a str> {
    project
        .get("apikeys")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter(|key| key.get("name").and_then(Value::as_str) == Some(name))
                .filter_map(|key| key.get("token").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default()
}
