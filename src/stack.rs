//! The stack: a named set of resources rendered into one template.
//!
//! Resources are added through the typed constructors in [`crate::resources`];
//! each one claims a construct path, gets a logical ID from it, and may
//! reference other resources through tokens. Nothing here talks to a cloud
//! API. The stack only accumulates declarations and hands back a [`Template`].

use serde_json::{Value, json};
use std::collections::BTreeSet;

use crate::error::{StackError, StackResult};
use crate::logical_id;
use crate::template::{Output, Parameter, Resource, Template};
use crate::token::{self, Pseudo};

/// Target account and region.
///
/// Unknown values render as pseudo parameters, which keeps the template
/// deployable to any account or region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Self { account, region }
    }

    pub fn is_agnostic(&self) -> bool {
        self.account.is_none() || self.region.is_none()
    }

    pub fn account_token(&self) -> Value {
        match &self.account {
            Some(account) => json!(account),
            None => Pseudo::AccountId.token(),
        }
    }

    pub fn region_token(&self) -> Value {
        match &self.region {
            Some(region) => json!(region),
            None => Pseudo::Region.token(),
        }
    }

    /// The `index`th availability zone of the region.
    ///
    /// Known regions use the conventional letter suffix; otherwise the zone
    /// is selected from the engine's zone list at deploy time.
    pub fn availability_zone(&self, index: usize) -> Value {
        match &self.region {
            Some(region) => {
                let letter = (b'a' + (index % 26) as u8) as char;
                json!(format!("{}{}", region, letter))
            }
            None => token::select(index, token::get_azs("")),
        }
    }
}

/// A stack under construction.
#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    env: Environment,
    paths: BTreeSet<String>,
    template: Template,
}

impl Stack {
    pub fn new(name: &str, env: Environment) -> Self {
        Self {
            name: name.to_string(),
            env,
            paths: BTreeSet::new(),
            template: Template::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn set_description(&mut self, description: &str) {
        self.template.description = Some(description.to_string());
    }

    /// `{ "Ref": "AWS::StackId" }`; only known once the stack exists.
    pub fn stack_id(&self) -> Value {
        Pseudo::StackId.token()
    }

    pub fn region(&self) -> Value {
        self.env.region_token()
    }

    pub fn account(&self) -> Value {
        self.env.account_token()
    }

    /// Human-readable path used in `Name` tags, e.g. `CocoAnnotatorStack/Instance`.
    pub fn display_path(&self, path: &[&str]) -> String {
        let mut parts = vec![self.name.as_str()];
        parts.extend(path.iter().copied().filter(|c| *c != "Resource"));
        parts.join("/")
    }

    /// The logical ID a resource at `path` gets (or would get).
    pub fn logical_id(&self, path: &[&str]) -> String {
        logical_id::allocate(path)
    }

    /// Claim `path` and add the resource under its logical ID.
    pub fn add_resource(&mut self, path: &[&str], resource: Resource) -> StackResult<String> {
        let joined = path.join("/");
        if !self.paths.insert(joined.clone()) {
            return Err(StackError::DuplicateId(joined));
        }
        let id = self.logical_id(path);
        if self.template.resources.contains_key(&id) {
            return Err(StackError::DuplicateId(id));
        }
        self.template.resources.insert(id.clone(), resource);
        Ok(id)
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.template.resources.get(id)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.template.resources.get_mut(id)
    }

    /// Add a deploy-time parameter. Re-adding the same parameter is a no-op.
    pub fn add_parameter(&mut self, id: &str, parameter: Parameter) -> StackResult<()> {
        match self.template.parameters.get(id) {
            Some(existing) if *existing == parameter => Ok(()),
            Some(_) => Err(StackError::DuplicateId(id.to_string())),
            None => {
                self.template.parameters.insert(id.to_string(), parameter);
                Ok(())
            }
        }
    }

    pub fn add_output(&mut self, name: &str, value: Value, description: &str) -> StackResult<()> {
        if self.template.outputs.contains_key(name) {
            return Err(StackError::DuplicateId(name.to_string()));
        }
        self.template.outputs.insert(
            name.to_string(),
            Output {
                value,
                description: Some(description.to_string()),
            },
        );
        Ok(())
    }

    /// `arn:<partition>:<service>:<region>:<account>:<resource>`
    pub fn format_arn(&self, service: &str, resource: &str, name: Value) -> Value {
        token::join(
            "",
            vec![
                json!("arn:"),
                Pseudo::Partition.token(),
                json!(format!(":{}:", service)),
                self.region(),
                json!(":"),
                self.account(),
                json!(format!(":{}/", resource)),
                name,
            ],
        )
    }

    /// `arn:<partition>:iam::<account>:root`
    pub fn account_root_arn(&self) -> Value {
        token::join(
            "",
            vec![
                json!("arn:"),
                Pseudo::Partition.token(),
                json!(":iam::"),
                self.account(),
                json!(":root"),
            ],
        )
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Finish the stack and hand back its template.
    pub fn synth(self) -> Template {
        self.template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_paths_are_rejected() {
        let mut stack = Stack::new("Test", Environment::default());
        stack
            .add_resource(&["Bucket", "Resource"], Resource::new("AWS::S3::Bucket"))
            .unwrap();
        let err = stack
            .add_resource(&["Bucket", "Resource"], Resource::new("AWS::S3::Bucket"))
            .unwrap_err();
        assert_eq!(err, StackError::DuplicateId("Bucket/Resource".into()));
    }

    #[test]
    fn test_agnostic_environment_uses_pseudo_parameters() {
        let env = Environment::default();
        assert!(env.is_agnostic());
        assert_eq!(env.region_token(), json!({ "Ref": "AWS::Region" }));
        assert_eq!(
            env.availability_zone(1),
            json!({ "Fn::Select": [1, { "Fn::GetAZs": "" }] })
        );
    }

    #[test]
    fn test_known_environment_uses_literals() {
        let env = Environment::new(Some("123456789012".into()), Some("eu-west-1".into()));
        assert_eq!(env.account_token(), json!("123456789012"));
        assert_eq!(env.availability_zone(0), json!("eu-west-1a"));
        assert_eq!(env.availability_zone(2), json!("eu-west-1c"));
    }

    #[test]
    fn test_account_root_arn() {
        let stack = Stack::new(
            "Test",
            Environment::new(Some("123456789012".into()), Some("us-east-1".into())),
        );
        assert_eq!(
            stack.account_root_arn(),
            json!({ "Fn::Join": ["", ["arn:", { "Ref": "AWS::Partition" }, ":iam::123456789012:root"]] })
        );
    }

    #[test]
    fn test_display_path_hides_resource() {
        let stack = Stack::new("CocoAnnotatorStack", Environment::default());
        assert_eq!(stack.display_path(&["Instance", "Resource"]), "CocoAnnotatorStack/Instance");
    }

    #[test]
    fn test_parameters_are_idempotent() {
        let mut stack = Stack::new("Test", Environment::default());
        let param = Parameter {
            kind: "String".into(),
            default: Some(json!("x")),
            description: None,
        };
        stack.add_parameter("P", param.clone()).unwrap();
        stack.add_parameter("P", param).unwrap();
        assert_eq!(stack.template().parameters.len(), 1);
    }
}
