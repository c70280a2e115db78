//! Project-scoped resource tools
//!
//! Accounts, users, contracts, transactions and policies of the selected
//! project. They authenticate with the project's secret key stored by
//! `select-project`, not with the session's user token, so they never go
//! through token renewal.
//!
//! Every tool is one row of [`RESOURCE_TOOLS`]: the backend route, where the
//! arguments go, and how the result is worded.

use std::sync::LazyLock;

use reqwest::Method;
use serde_json::{Map, Value, json};
use url::form_urlencoded;

use super::{ToolDefinition, ToolSession, Toolbox};
use crate::api::{RequestSpec, ToolResponse};
use crate::{Error, Result};

/// Where the arguments left after path substitution are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Payload {
    None,
    Query,
    Body,
}

/// One project-scoped tool
struct ResourceTool {
    name: &'static str,
    description: &'static str,
    method: Method,
    /// Backend path; `{}` is replaced by the `path_arg` argument
    path: &'static str,
    path_arg: Option<&'static str>,
    payload: Payload,
    /// Completes "Error {action}: ..."
    action: &'static str,
    /// Printed before the pretty-printed result
    banner: Option<&'static str>,
    schema: Value,
}

impl ResourceTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name,
            description: self.description,
            input_schema: self.schema.clone(),
        }
    }

    fn required(&self) -> impl Iterator<Item = &str> {
        self.schema
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }

    /// Build the backend request from the tool arguments
    fn request(&self, args: &Value) -> Result<RequestSpec> {
        if let Some(missing) = self
            .required()
            .find(|key| args.get(*key).is_none_or(Value::is_null))
        {
            return Err(Error::InvalidRequest(format!("Missing '{missing}' parameter")));
        }

        let mut fields: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
        let mut path = self.path.to_string();
        if let Some(arg) = self.path_arg {
            let id = fields
                .remove(arg)
                .and_then(|v| v.as_str().map(str::to_string))
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::InvalidRequest(format!("Missing '{arg}' parameter")))?;
            let encoded: String = form_urlencoded::byte_serialize(id.as_bytes()).collect();
            path = path.replace("{}", &encoded);
        }

        let spec = RequestSpec::new(self.method.clone(), path);
        Ok(match self.payload {
            Payload::None => spec,
            Payload::Body => spec.with_body(Value::Object(fields)),
            Payload::Query => fields.into_iter().fold(spec, |spec, (key, value)| {
                query_values(&value)
                    .into_iter()
                    .fold(spec, |spec, text| spec.with_query(key.clone(), text))
            }),
        })
    }

    fn render(&self, value: &Value) -> String {
        let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        match self.banner {
            Some(banner) => format!("{banner}{pretty}"),
            None => pretty,
        }
    }
}

/// Query text for one argument; arrays repeat the key
fn query_values(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(query_values).collect(),
        other => vec![other.to_string()],
    }
}

impl Toolbox {
    /// Run a project-scoped tool with the selected project's secret key
    async fn run_resource(&self, session: &ToolSession, tool: &ResourceTool, args: &Value) -> ToolResponse {
        let spec = match tool.request(args) {
            Ok(spec) => spec,
            Err(e) => return ToolResponse::text(e.to_string()),
        };
        let Some(api_secret) = session.api_secret() else {
            return ToolResponse::text("You must select a project first");
        };

        match self.api.call_with_key(&api_secret, &spec).await {
            Ok(value) => ToolResponse::text(tool.render(&value)),
            Err(e) => ToolResponse::text(format!("Error {}: {e}", tool.action)),
        }
    }

    /// Run `name` if it is a project-scoped tool
    pub(super) async fn call_resource(
        &self,
        session: &ToolSession,
        name: &str,
        args: &Value,
    ) -> Option<ToolResponse> {
        let tool = RESOURCE_TOOLS.iter().find(|tool| tool.name == name)?;
        Some(self.run_resource(session, tool, args).await)
    }
}

/// Definitions of the project-scoped tools
pub(super) fn definitions() -> impl Iterator<Item = ToolDefinition> {
    RESOURCE_TOOLS.iter().map(ResourceTool::definition)
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({"type": "object", "properties": properties, "required": required})
}

/// `properties` plus limit, skip and order
fn paged(mut properties: Value) -> Value {
    if let Some(map) = properties.as_object_mut() {
        map.insert(
            "limit".to_string(),
            json!({"type": "integer", "minimum": 1, "description": "Maximum number of records to return"}),
        );
        map.insert(
            "skip".to_string(),
            json!({"type": "integer", "minimum": 0, "description": "Number of records to skip for pagination"}),
        );
        map.insert(
            "order".to_string(),
            json!({"type": "string", "enum": ["asc", "desc"], "description": "Sort order"}),
        );
    }
    object(properties, &[])
}

fn id_only(description: &str) -> Value {
    object(json!({"id": {"type": "string", "description": description}}), &["id"])
}

fn user_fields() -> Value {
    json!({
        "name": {"type": "string", "description": "The name of the user"},
        "description": {"type": "string", "description": "A description of the user"},
        "metadata": {"type": "object", "description": "Key-value pairs stored with the user"}
    })
}

fn contract_fields() -> Value {
    json!({
        "name": {"type": "string", "description": "Name of the contract"},
        "chainId": {"type": "integer", "description": "The chain ID of the contract"},
        "address": {"type": "string", "description": "Address of the contract"},
        "abi": {"type": "array", "description": "The ABI of the contract"},
        "publicVerification": {"type": "boolean", "description": "Whether the ABI is verified publicly"}
    })
}

fn policy_strategy() -> Value {
    json!({
        "type": "object",
        "properties": {
            "sponsorSchema": {"type": "string", "enum": ["pay_for_user", "charge_custom_tokens", "fixed_rate"]},
            "tokenContract": {"type": "string", "description": "Contract ID (con_...) of the token users pay with"},
            "tokenContractAmount": {"type": "string", "description": "Exchange rate or amount in WEI"},
            "depositor": {"type": "string", "description": "Developer account ID (dac_...) paying for gas"}
        },
        "required": ["sponsorSchema"]
    })
}

fn policy_rule_fields(mut extra: Value) -> Value {
    if let Some(map) = extra.as_object_mut() {
        for (key, value) in [
            ("functionName", json!({"type": "string", "description": "Contract function the rule allows"})),
            ("contract", json!({"type": "string", "description": "Contract ID (con_...) the rule applies to"})),
            ("wildcard", json!({"type": "boolean", "description": "Allow every function of the contract"})),
            ("gasLimit", json!({"type": "string", "description": "Gas limit in WEI"})),
            ("countLimit", json!({"type": "integer", "description": "Number of transactions allowed per interval"})),
            ("timeIntervalType", json!({"type": "string", "enum": ["minute", "hour", "day", "week", "month"]})),
            ("timeIntervalValue", json!({"type": "integer", "description": "Length of the interval"})),
        ] {
            map.insert(key.to_string(), value);
        }
    }
    extra
}

static RESOURCE_TOOLS: LazyLock<Vec<ResourceTool>> = LazyLock::new(|| {
    vec![
        // Accounts
        ResourceTool {
            name: "create-account",
            description: "Creates a new blockchain account for the provided user. If no user is provided, a new one is created.",
            method: Method::POST,
            path: "/accounts",
            path_arg: None,
            payload: Payload::Body,
            action: "creating account",
            banner: None,
            schema: object(
                json!({
                    "chainId": {"type": "integer", "description": "The chain id for the account"},
                    "externalOwnerAddress": {"type": "string", "description": "Owner address of the new account"},
                    "accountType": {"type": "string", "description": "Smart account type, UpgradeableV6 by default"},
                    "defaultGuardian": {"type": "boolean", "description": "Enable the default guardian for social recovery"},
                    "tokenContract": {"type": "string", "description": "For ERC6551, the NFT contract address"},
                    "tokenId": {"type": "integer", "description": "For ERC6551, the owning token id"},
                    "player": {"type": "string", "description": "User id to attach the account to"}
                }),
                &["chainId"],
            ),
        },
        ResourceTool {
            name: "get-account",
            description: "Get detailed information about a specific account in the project",
            method: Method::GET,
            path: "/accounts/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "getting account",
            banner: None,
            schema: id_only("The unique account identifier"),
        },
        ResourceTool {
            name: "list-accounts",
            description: "Get the accounts in the project with optional filtering and pagination",
            method: Method::GET,
            path: "/accounts",
            path_arg: None,
            payload: Payload::Query,
            action: "listing accounts",
            banner: None,
            schema: paged(json!({
                "player": {"type": "string", "description": "User id to filter accounts by"},
                "address": {"type": "string", "description": "Address of the account"}
            })),
        },
        // Users
        ResourceTool {
            name: "create-user",
            description: "Creates a new user in the project",
            method: Method::POST,
            path: "/players",
            path_arg: None,
            payload: Payload::Body,
            action: "creating user",
            banner: None,
            schema: object(user_fields(), &[]),
        },
        ResourceTool {
            name: "get-user",
            description: "Get a user of the project by ID",
            method: Method::GET,
            path: "/players/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "getting user",
            banner: None,
            schema: id_only("The unique user identifier"),
        },
        ResourceTool {
            name: "list-users",
            description: "Lists the users of the project with optional filtering and pagination",
            method: Method::GET,
            path: "/players",
            path_arg: None,
            payload: Payload::Query,
            action: "listing users",
            banner: None,
            schema: paged(json!({"name": {"type": "string", "description": "Filter users by name"}})),
        },
        ResourceTool {
            name: "update-user",
            description: "Updates a user of the project",
            method: Method::POST,
            path: "/players/{}",
            path_arg: Some("id"),
            payload: Payload::Body,
            action: "updating user",
            banner: None,
            schema: object(
                {
                    let mut fields = user_fields();
                    fields["id"] = json!({"type": "string", "description": "The unique user identifier"});
                    fields
                },
                &["id"],
            ),
        },
        ResourceTool {
            name: "delete-user",
            description: "Deletes a user of the project",
            method: Method::DELETE,
            path: "/players/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "deleting user",
            banner: None,
            schema: id_only("The unique user identifier"),
        },
        // Contracts
        ResourceTool {
            name: "create-contract",
            description: "Registers a contract in the project",
            method: Method::POST,
            path: "/contracts",
            path_arg: None,
            payload: Payload::Body,
            action: "creating contract",
            banner: Some("Contract created successfully!\n\nFull contract details:\n"),
            schema: object(contract_fields(), &["name", "chainId", "address"]),
        },
        ResourceTool {
            name: "get-contract",
            description: "Get a contract of the project by ID",
            method: Method::GET,
            path: "/contracts/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "getting contract",
            banner: None,
            schema: id_only("The unique contract identifier"),
        },
        ResourceTool {
            name: "list-contracts",
            description: "Lists the contracts of the project with optional filtering and pagination",
            method: Method::GET,
            path: "/contracts",
            path_arg: None,
            payload: Payload::Query,
            action: "listing contracts",
            banner: None,
            schema: paged(json!({
                "name": {"type": "string", "description": "Filter by contract name"},
                "deleted": {"type": "boolean", "description": "Include deleted contracts"},
                "chainId": {"type": "integer", "description": "Filter by chain ID"},
                "address": {"type": "string", "description": "Filter by contract address"}
            })),
        },
        ResourceTool {
            name: "update-contract",
            description: "Updates a contract of the project",
            method: Method::POST,
            path: "/contracts/{}",
            path_arg: Some("id"),
            payload: Payload::Body,
            action: "updating contract",
            banner: Some("Contract updated successfully!\n\nFull contract details:\n"),
            schema: object(
                {
                    let mut fields = contract_fields();
                    fields["id"] = json!({"type": "string", "description": "The unique contract identifier"});
                    fields
                },
                &["id"],
            ),
        },
        ResourceTool {
            name: "delete-contract",
            description: "Deletes a contract of the project",
            method: Method::DELETE,
            path: "/contracts/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "deleting contract",
            banner: Some("Contract deleted successfully!\n\nFull contract details:\n"),
            schema: id_only("The unique contract identifier"),
        },
        // Transactions
        ResourceTool {
            name: "simulate-transaction",
            description: "Estimates the gas cost of a transaction without sending it",
            method: Method::POST,
            path: "/transaction_intents/estimate_gas_cost",
            path_arg: None,
            payload: Payload::Body,
            action: "simulating transaction",
            banner: None,
            schema: object(
                json!({
                    "chainId": {"type": "integer", "description": "The chain ID"},
                    "interactions": {
                        "type": "array",
                        "description": "Contract calls of the transaction",
                        "items": {
                            "type": "object",
                            "properties": {
                                "contract": {"type": "string"},
                                "functionName": {"type": "string"},
                                "functionArgs": {"type": "array"},
                                "to": {"type": "string"},
                                "value": {"type": "string"}
                            }
                        }
                    },
                    "player": {"type": "string", "description": "User id"},
                    "account": {"type": "string", "description": "Account id"},
                    "policy": {"type": "string", "description": "Policy id sponsoring the transaction"},
                    "externalOwnerAddress": {"type": "string", "description": "Owner address"},
                    "optimistic": {"type": "boolean", "description": "Do not wait for confirmation"}
                }),
                &["chainId", "interactions"],
            ),
        },
        ResourceTool {
            name: "get-transaction",
            description: "Get a transaction intent of the project by ID",
            method: Method::GET,
            path: "/transaction_intents/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "getting transaction",
            banner: None,
            schema: id_only("The unique transaction intent identifier"),
        },
        ResourceTool {
            name: "list-transactions",
            description: "Lists the transaction intents of the project with optional filtering and pagination",
            method: Method::GET,
            path: "/transaction_intents",
            path_arg: None,
            payload: Payload::Query,
            action: "listing transactions",
            banner: None,
            schema: paged(json!({
                "chainId": {"type": "integer", "description": "Filter by chain ID"},
                "account": {"type": "array", "items": {"type": "string"}, "description": "Filter by account ids"},
                "player": {"type": "array", "items": {"type": "string"}, "description": "Filter by user ids"},
                "status": {"type": "integer", "description": "Filter by status"},
                "policy": {"type": "array", "items": {"type": "string"}, "description": "Filter by policy ids"}
            })),
        },
        // Policies
        ResourceTool {
            name: "list-policies",
            description: "Lists all the policies in the project with optional filtering and pagination",
            method: Method::GET,
            path: "/policies",
            path_arg: None,
            payload: Payload::Query,
            action: "listing policies",
            banner: None,
            schema: paged(json!({
                "name": {"type": "string", "description": "Filter policies by name"},
                "deleted": {"type": "boolean", "description": "Include deleted policies"},
                "chainId": {"type": "integer", "description": "Filter by chain ID"},
                "enabled": {"type": "boolean", "description": "Filter by enabled status"}
            })),
        },
        ResourceTool {
            name: "create-policy",
            description: "Creates a new gas policy in the project",
            method: Method::POST,
            path: "/policies",
            path_arg: None,
            payload: Payload::Body,
            action: "creating policy",
            banner: Some("Policy created successfully!\n\nFull policy details:\n"),
            schema: object(
                json!({
                    "name": {"type": "string", "description": "Name of the policy"},
                    "chainId": {"type": "integer", "description": "The chain ID"},
                    "strategy": policy_strategy(),
                    "paymaster": {"type": "string", "description": "ID of the paymaster"},
                    "forwarderContract": {"type": "string", "description": "ID of the forwarder contract"}
                }),
                &["name", "chainId", "strategy"],
            ),
        },
        ResourceTool {
            name: "get-policy",
            description: "Get a policy of the project by ID",
            method: Method::GET,
            path: "/policies/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "getting policy",
            banner: None,
            schema: id_only("The unique policy identifier"),
        },
        ResourceTool {
            name: "update-policy",
            description: "Updates a policy of the project",
            method: Method::POST,
            path: "/policies/{}",
            path_arg: Some("id"),
            payload: Payload::Body,
            action: "updating policy",
            banner: Some("Policy updated successfully!\n\nFull policy details:\n"),
            schema: object(
                json!({
                    "id": {"type": "string", "description": "The unique policy identifier"},
                    "name": {"type": "string"},
                    "chainId": {"type": "integer"},
                    "strategy": policy_strategy(),
                    "paymaster": {"type": "string"},
                    "forwarderContract": {"type": "string"},
                    "deleted": {"type": "boolean"}
                }),
                &["id"],
            ),
        },
        ResourceTool {
            name: "delete-policy",
            description: "Deletes a policy of the project",
            method: Method::DELETE,
            path: "/policies/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "deleting policy",
            banner: Some("Policy deleted successfully!\n\nFull policy details:\n"),
            schema: id_only("The unique policy identifier"),
        },
        ResourceTool {
            name: "disable-policy",
            description: "Disables a policy so it stops sponsoring transactions",
            method: Method::PUT,
            path: "/policies/{}/disable",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "disabling policy",
            banner: Some("Policy disabled successfully!\n\nFull policy details:\n"),
            schema: id_only("The unique policy identifier"),
        },
        ResourceTool {
            name: "enable-policy",
            description: "Enables a disabled policy",
            method: Method::PUT,
            path: "/policies/{}/enable",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "enabling policy",
            banner: Some("Policy enabled successfully!\n\nFull policy details:\n"),
            schema: id_only("The unique policy identifier"),
        },
        ResourceTool {
            name: "list-policy-rules",
            description: "Lists the rules of a policy",
            method: Method::GET,
            path: "/policy_rules",
            path_arg: None,
            payload: Payload::Query,
            action: "getting policy rules",
            banner: None,
            schema: {
                let mut schema = paged(json!({
                    "policy": {"type": "string", "description": "The policy whose rules are listed"}
                }));
                schema["required"] = json!(["policy"]);
                schema
            },
        },
        ResourceTool {
            name: "create-policy-rule",
            description: "Adds a rule to a policy",
            method: Method::POST,
            path: "/policy_rules",
            path_arg: None,
            payload: Payload::Body,
            action: "creating policy rule",
            banner: Some("Policy rule created successfully!\n\nFull policy rule details:\n"),
            schema: object(
                policy_rule_fields(json!({
                    "policy": {"type": "string", "description": "The policy the rule belongs to"},
                    "type": {"type": "string", "enum": ["contract_functions", "account_functions", "rate_limit"]}
                })),
                &["policy", "type"],
            ),
        },
        ResourceTool {
            name: "update-policy-rule",
            description: "Updates a rule of a policy",
            method: Method::POST,
            path: "/policy_rules/{}",
            path_arg: Some("id"),
            payload: Payload::Body,
            action: "updating policy rule",
            banner: Some("Policy rule updated successfully!\n\nFull policy rule details:\n"),
            schema: object(
                policy_rule_fields(json!({
                    "id": {"type": "string", "description": "The unique policy rule identifier"},
                    "type": {"type": "string", "enum": ["contract_functions", "account_functions", "rate_limit"]}
                })),
                &["id", "type"],
            ),
        },
        ResourceTool {
            name: "delete-policy-rule",
            description: "Deletes a rule of a policy",
            method: Method::DELETE,
            path: "/policy_rules/{}",
            path_arg: Some("id"),
            payload: Payload::None,
            action: "deleting policy rule",
            banner: Some("Policy rule deleted successfully!\n\nFull policy rule details:\n"),
            schema: id_only("The unique policy rule identifier"),
        },
    ]
});
