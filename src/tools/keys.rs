//! API key tools for the selected project

use reqwest::Method;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use super::{ToolSession, Toolbox, keys_named};
use crate::api::{RequestSpec, ToolResponse};

/// How a key kind is listed
struct KeyKind {
    name: &'static str,
    prefix: &'static str,
    label: &'static str,
}

const PUBLISHABLE: KeyKind = KeyKind {
    name: "pk",
    prefix: "pk_test_",
    label: "publishable keys",
};

const SECRET: KeyKind = KeyKind {
    name: "sk",
    prefix: "sk_test_",
    label: "secret keys",
};

const SHIELD_PUBLISHABLE: KeyKind = KeyKind {
    name: "pk_shield",
    prefix: "",
    label: "shield publishable key",
};

const SHIELD_SECRET: KeyKind = KeyKind {
    name: "sk_shield",
    prefix: "",
    label: "shield secret key",
};

impl Toolbox {
    /// `pk` keys of the selected project
    pub async fn get_publishable_keys(&self, session: &ToolSession) -> ToolResponse {
        self.list_keys(session, &PUBLISHABLE).await
    }

    /// `sk` keys of the selected project
    pub async fn get_secret_keys(&self, session: &ToolSession) -> ToolResponse {
        self.list_keys(session, &SECRET).await
    }

    /// `pk_shield` key of the selected project
    pub async fn get_shield_publishable_key(&self, session: &ToolSession) -> ToolResponse {
        self.list_keys(session, &SHIELD_PUBLISHABLE).await
    }

    /// `sk_shield` key of the selected project
    pub async fn get_shield_secret_key(&self, session: &ToolSession) -> ToolResponse {
        self.list_keys(session, &SHIELD_SECRET).await
    }

    /// Create a `pk` key and list all of them
    pub async fn create_publishable_key(&self, session: &ToolSession) -> ToolResponse {
        self.create_key(session, &PUBLISHABLE).await
    }

    /// Create an `sk` key and list all of them
    pub async fn create_secret_key(&self, session: &ToolSession) -> ToolResponse {
        self.create_key(session, &SECRET).await
    }

    /// Register the project with the key-custody service, then record both
    /// shield keys on the project. The encryption share is only ever shown
    /// in this response.
    pub async fn create_shield_keys(&self, session: &ToolSession) -> ToolResponse {
        let Some(project_id) = session.active_project() else {
            return ToolResponse::text("No project selected");
        };

        match self.register_shield(session, &project_id).await {
            Ok(keys) => {
                info!(project_id = %project_id, "Shield keys created");
                ToolResponse::text(format!(
                    "Created shield keys, here are all the existing keys:\nPublic key: {}, \nSecret key: {}, \nEncryption key: {} \nMake sure to copy the encryption key, it will never be shown again. Also, never store the encryption key on the client side, it is only for the server side.",
                    field(&keys, "api_key"),
                    field(&keys, "api_secret"),
                    field(&keys, "encryption_part"),
                ))
            }
            Err(e) => ToolResponse::text(format!("Failed to create shield keys: {e}")),
        }
    }

    async fn register_shield(&self, session: &ToolSession, project_id: &str) -> crate::Result<Value> {
        let register = RequestSpec::post(
            format!("{}/register", self.shield_url),
            json!({ "name": project_id, "generate_encryption_key": true }),
        )
        .absolute();
        let keys = self.api.call_json(session.credential(), &register).await?;

        for kind in [SHIELD_PUBLISHABLE.name, SHIELD_SECRET.name] {
            let record = RequestSpec::new(Method::PUT, "/project/apikey")
                .with_header("project", project_id)
                .with_body(json!({ "type": kind, "uuid": Uuid::new_v4().to_string() }));
            self.api.call_json(session.credential(), &record).await?;
        }
        Ok(keys)
    }

    async fn list_keys(&self, session: &ToolSession, kind: &KeyKind) -> ToolResponse {
        let Some(project_id) = session.active_project() else {
            return ToolResponse::text("No project selected");
        };

        let spec = RequestSpec::get(format!("/projects/{project_id}"));
        let project = match self.api.call_json(session.credential(), &spec).await {
            Ok(project) => project,
            Err(e) => return ToolResponse::text(format!("Failed to get {}: {e}", kind.label)),
        };

        let tokens = keys_named(&project, kind.name);
        if tokens.is_empty() {
            return ToolResponse::text(format!("No {} found", kind.label));
        }
        ToolResponse::texts(
            tokens
                .into_iter()
                .map(|token| format!("{}: {}{token}", kind.name, kind.prefix)),
        )
    }

    async fn create_key(&self, session: &ToolSession, kind: &KeyKind) -> ToolResponse {
        let Some(project_id) = session.active_project() else {
            return ToolResponse::text("No project selected");
        };

        let spec = RequestSpec::new(Method::POST, "/project/apikey")
            .with_header("project", project_id)
            .with_body(json!({ "type": kind.name }));
        let project: Value = match self.api.call_json(session.credential(), &spec).await {
            Ok(project) => project,
            Err(e) => {
                return ToolResponse::text(format!(
                    "Failed to create {}: {e}",
                    kind.label.trim_end_matches('s')
                ));
            }
        };

        let tokens = keys_named(&project, kind.name);
        if tokens.is_empty() {
            return ToolResponse::text(format!("No {} found", kind.label));
        }
        let listed = tokens
            .into_iter()
            .map(|token| format!("{}{token}", kind.prefix))
            .collect::<Vec<_>>()
            .join(", ");
        ToolResponse::text(format!(
            "Created {}, here are all the existing keys: {listed}",
            kind.label.trim_end_matches('s')
        ))
    }
}

fn field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}
