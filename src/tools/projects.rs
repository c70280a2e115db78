//! Project tools

use reqwest::Method;
use serde_json::json;
use tracing::info;

use super::{ProjectSelection, ToolSession, Toolbox, keys_named};
use crate::Result;
use crate::api::{RequestSpec, ToolResponse};

impl Toolbox {
    /// `GET /projects`
    pub async fn list_projects(&self, session: &ToolSession) -> Result<ToolResponse> {
        self.api
            .call(session.credential(), &RequestSpec::get("/projects"))
            .await
    }

    /// `GET /projects/{id}`
    pub async fn get_project(&self, session: &ToolSession, project_id: &str) -> Result<ToolResponse> {
        self.api
            .call(session.credential(), &RequestSpec::get(format!("/projects/{project_id}")))
            .await
    }

    /// `POST /projects {name}`
    pub async fn create_project(&self, session: &ToolSession, name: &str) -> Result<ToolResponse> {
        let spec = RequestSpec::new(Method::POST, "/projects").with_body(json!({ "name": name }));
        self.api.call(session.credential(), &spec).await
    }

    /// Make `project_id` the active project and keep its secret key
    pub async fn select_project(&self, session: &ToolSession, project_id: &str) -> ToolResponse {
        let spec = RequestSpec::get(format!("/projects/{project_id}"));
        let project = match self.api.call_json(session.credential(), &spec).await {
            Ok(project) => project,
            Err(e) => return ToolResponse::text(format!("Failed to select project: {e}")),
        };

        let Some(secret) = keys_named(&project, "sk").first().copied() else {
            return ToolResponse::text("No matching project was found");
        };

        session.select(ProjectSelection {
            active_project: Some(project_id.to_string()),
            api_secret: Some(format!("sk_test_{secret}")),
        });
        info!(project_id = %project_id, "Project selected");
        ToolResponse::text(format!("Selected project {project_id}"))
    }

    /// Current selection as pretty JSON
    pub fn show_selected_project(session: &ToolSession) -> ToolResponse {
        let selection = session.selection();
        ToolResponse::text(
            serde_json::to_string_pretty(&selection).unwrap_or_else(|e| format!("{e}")),
        )
    }

    /// Forget the active project
    pub fn deselect_project(session: &ToolSession) -> ToolResponse {
        session.select(ProjectSelection::default());
        ToolResponse::text("Project deselected")
    }
}
