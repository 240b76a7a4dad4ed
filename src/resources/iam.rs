//! Roles, trust policies and permission grants.

use serde_json::{Value, json};

use crate::error::{StackError, StackResult};
use crate::stack::Stack;
use crate::template::Resource;
use crate::token;

const POLICY_VERSION: &str = "2012-10-17";

/// Who may assume a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The root of the account the stack deploys into.
    AccountRoot,
    /// An AWS service, e.g. `ec2.amazonaws.com`.
    Service(String),
}

impl Principal {
    fn render(&self, stack: &Stack) -> Value {
        match self {
            Self::AccountRoot => json!({ "AWS": stack.account_root_arn() }),
            Self::Service(service) => json!({ "Service": service }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// One statement of a policy document.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str], resources: Vec<Value>) -> Self {
        Self {
            effect: Effect::Allow,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources,
        }
    }

    pub fn render(&self) -> Value {
        let effect = match self.effect {
            Effect::Allow => "Allow",
            Effect::Deny => "Deny",
        };
        json!({
            "Action": one_or_list(self.actions.iter().map(|a| json!(a)).collect()),
            "Effect": effect,
            "Resource": one_or_list(self.resources.clone())
        })
    }
}

fn one_or_list(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

#[derive(Debug, Clone)]
pub struct RoleProps {
    pub assumed_by: Principal,
    pub description: Option<String>,
    /// `Name` tag; roles declared by other constructs tag themselves.
    pub name_tag: Option<String>,
}

/// Handle to a declared role.
#[derive(Debug, Clone)]
pub struct Role {
    id: String,
    path: Vec<String>,
}

impl Role {
    pub fn new(stack: &mut Stack, id: &str, props: RoleProps) -> StackResult<Self> {
        Self::at_path(stack, &[id], props)
    }

    /// Declare a role nested under another construct.
    pub(crate) fn at_path(stack: &mut Stack, path: &[&str], props: RoleProps) -> StackResult<Self> {
        let trust = json!({
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": props.assumed_by.render(stack)
            }],
            "Version": POLICY_VERSION
        });
        let resource = Resource::new("AWS::IAM::Role")
            .with("AssumeRolePolicyDocument", trust)
            .with_opt("Description", props.description.map(|d| json!(d)))
            .with_opt("Tags", props.name_tag.map(|n| super::name_tags(&n)));

        let mut full_path = path.to_vec();
        full_path.push("Resource");
        let id = stack.add_resource(&full_path, resource)?;
        Ok(Self {
            id,
            path: path.iter().map(|c| c.to_string()).collect(),
        })
    }

    pub fn logical_id(&self) -> &str {
        &self.id
    }

    pub fn role_name(&self) -> Value {
        token::reference(&self.id)
    }

    pub fn arn(&self) -> Value {
        token::get_att(&self.id, "Arn")
    }

    /// Logical ID of the role's default policy, created on first grant.
    pub fn default_policy_id(&self, stack: &Stack) -> String {
        let path = self.default_policy_path();
        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        stack.logical_id(&path)
    }

    fn default_policy_path(&self) -> Vec<String> {
        let mut path = self.path.clone();
        path.push("DefaultPolicy".to_string());
        path.push("Resource".to_string());
        path
    }

    /// Append a statement to the role's default policy.
    pub fn add_to_policy(&self, stack: &mut Stack, statement: PolicyStatement) -> StackResult<String> {
        let policy_id = self.default_policy_id(stack);
        if stack.resource(&policy_id).is_none() {
            let resource = Resource::new("AWS::IAM::Policy")
                .with(
                    "PolicyDocument",
                    json!({ "Statement": [], "Version": POLICY_VERSION }),
                )
                .with("PolicyName", json!(policy_id))
                .with("Roles", json!([self.role_name()]));
            let path = self.default_policy_path();
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            stack.add_resource(&path, resource)?;
        }

        let statements = stack
            .resource_mut(&policy_id)
            .and_then(|policy| policy.properties.get_mut("PolicyDocument"))
            .and_then(|doc| doc.get_mut("Statement"))
            .and_then(Value::as_array_mut)
            .ok_or_else(|| StackError::InvalidValue {
                field: "PolicyDocument".to_string(),
                value: policy_id.clone(),
            })?;
        let rendered = statement.render();
        if !statements.contains(&rendered) {
            statements.push(rendered);
        }
        Ok(policy_id)
    }
}

/// A permission given to a principal over some resources.
///
/// Recording the grant does not perform the action it allows.
#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub policy_id: String,
    pub grantee: String,
    pub statement: PolicyStatement,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Environment;

    fn stack() -> Stack {
        Stack::new("Test", Environment::default())
    }

    #[test]
    fn test_account_root_trust_policy() {
        let mut stack = stack();
        let role = Role::new(
            &mut stack,
            "coco-annotator-role",
            RoleProps {
                assumed_by: Principal::AccountRoot,
                description: None,
                name_tag: None,
            },
        )
        .unwrap();
        let resource = stack.resource(role.logical_id()).unwrap();
        assert_eq!(
            resource.property("AssumeRolePolicyDocument").unwrap()["Statement"][0]["Principal"],
            json!({
                "AWS": { "Fn::Join": ["", [
                    "arn:", { "Ref": "AWS::Partition" }, ":iam::", { "Ref": "AWS::AccountId" }, ":root"
                ]] }
            })
        );
    }

    #[test]
    fn test_add_to_policy_creates_default_policy_once() {
        let mut stack = stack();
        let role = Role::new(
            &mut stack,
            "Role",
            RoleProps {
                assumed_by: Principal::Service("ec2.amazonaws.com".into()),
                description: None,
                name_tag: None,
            },
        )
        .unwrap();
        let first = role
            .add_to_policy(&mut stack, PolicyStatement::allow(&["s3:GetObject"], vec![json!("*")]))
            .unwrap();
        let second = role
            .add_to_policy(&mut stack, PolicyStatement::allow(&["s3:PutObject"], vec![json!("*")]))
            .unwrap();
        assert_eq!(first, second);

        let policy = stack.resource(&first).unwrap();
        assert_eq!(policy.kind, "AWS::IAM::Policy");
        assert_eq!(policy.property("Roles"), Some(&json!([{ "Ref": role.logical_id() }])));
        let statements = policy.property("PolicyDocument").unwrap()["Statement"]
            .as_array()
            .unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0]["Action"], json!("s3:GetObject"));
    }

    #[test]
    fn test_identical_statements_are_merged() {
        let mut stack = stack();
        let role = Role::new(
            &mut stack,
            "Role",
            RoleProps {
                assumed_by: Principal::AccountRoot,
                description: None,
                name_tag: None,
            },
        )
        .unwrap();
        let statement = PolicyStatement::allow(&["ec2:AttachVolume"], vec![json!("a"), json!("b")]);
        let id = role.add_to_policy(&mut stack, statement.clone()).unwrap();
        role.add_to_policy(&mut stack, statement).unwrap();
        let doc = stack.resource(&id).unwrap().property("PolicyDocument").unwrap();
        assert_eq!(doc["Statement"].as_array().unwrap().len(), 1);
        assert_eq!(doc["Statement"][0]["Resource"], json!(["a", "b"]));
    }
}
