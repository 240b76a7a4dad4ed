//! Machine image selection.
//!
//! The latest vendor image is not pinned: the template carries a parameter
//! backed by the vendor's public SSM path, so every deploy resolves whatever
//! image is current at that moment.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::StackResult;
use crate::logical_id;
use crate::stack::Stack;
use crate::template::Parameter;
use crate::token;

const SSM_IMAGE_TYPE: &str = "AWS::SSM::Parameter::Value<AWS::EC2::Image::Id>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmazonLinuxGeneration {
    #[default]
    AmazonLinux,
    AmazonLinux2,
}

impl AmazonLinuxGeneration {
    fn ssm_path(&self) -> &'static str {
        match self {
            Self::AmazonLinux => "/aws/service/ami-amazon-linux-latest/amzn-ami-hvm-x86_64-gp2",
            Self::AmazonLinux2 => "/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineImage {
    /// Newest Amazon Linux image, looked up at deploy time.
    LatestAmazonLinux(AmazonLinuxGeneration),
    /// A fixed image id.
    Pinned(String),
}

impl MachineImage {
    pub fn latest_amazon_linux() -> Self {
        Self::LatestAmazonLinux(AmazonLinuxGeneration::default())
    }

    /// The value for an instance's `ImageId`, registering a parameter if needed.
    pub fn image_id(&self, stack: &mut Stack) -> StackResult<Value> {
        match self {
            Self::Pinned(ami) => Ok(json!(ami)),
            Self::LatestAmazonLinux(generation) => {
                let path = generation.ssm_path();
                let id = Self::parameter_id(path);
                stack.add_parameter(
                    &id,
                    Parameter {
                        kind: SSM_IMAGE_TYPE.to_string(),
                        default: Some(json!(path)),
                        description: None,
                    },
                )?;
                Ok(token::reference(&id))
            }
        }
    }

    fn parameter_id(ssm_path: &str) -> String {
        format!(
            "SsmParameterValue{}Parameter",
            logical_id::allocate(&["SsmParameterValue", ssm_path])
                .trim_start_matches("SsmParameterValue")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::Environment;

    #[test]
    fn test_latest_image_is_a_deploy_time_parameter() {
        let mut stack = Stack::new("Test", Environment::default());
        let image_id = MachineImage::latest_amazon_linux().image_id(&mut stack).unwrap();

        let (id, param) = stack.template().parameters.iter().next().unwrap();
        assert_eq!(image_id, json!({ "Ref": id }));
        assert!(id.starts_with("SsmParameterValueawsserviceamiamazonlinuxlatest"));
        assert!(id.ends_with("Parameter"));
        assert_eq!(param.kind, SSM_IMAGE_TYPE);
        assert_eq!(
            param.default,
            Some(json!("/aws/service/ami-amazon-linux-latest/amzn-ami-hvm-x86_64-gp2"))
        );
    }

    #[test]
    fn test_same_image_shares_parameter() {
        let mut stack = Stack::new("Test", Environment::default());
        let image = MachineImage::latest_amazon_linux();
        assert_eq!(image.image_id(&mut stack).unwrap(), image.image_id(&mut stack).unwrap());
        assert_eq!(stack.template().parameters.len(), 1);
    }

    #[test]
    fn test_pinned_image_is_literal() {
        let mut stack = Stack::new("Test", Environment::default());
        let image = MachineImage::Pinned("ami-0123456789abcdef0".into());
        assert_eq!(image.image_id(&mut stack).unwrap(), json!("ami-0123456789abcdef0"));
        assert!(stack.template().parameters.is_empty());
    }
}
