//! Typed infrastructure definition for the COCO Annotator stack.
//!
//! The stack is declared in Rust and rendered to a CloudFormation template;
//! an external provisioning engine applies it. Nothing in this crate calls a
//! cloud API.
//!
//! # Example
//!
//! ```
//! use coco_stack::annotator;
//! use coco_stack::config::{StackConfig, Variant};
//!
//! let template = annotator::synth(&StackConfig::preset(Variant::Extended)).unwrap();
//! assert_eq!(template.count_of_type("AWS::EC2::Instance"), 1);
//! assert!(template.outputs.contains_key("InstancePublicIp"));
//! ```
//!
//! # Layers
//!
//! - [`token`], [`logical_id`], [`cidr`]: values the template is built from
//! - [`resources`]: one constructor per resource kind, adding to a [`stack::Stack`]
//! - [`template`]: the rendered document and its (de)serialization
//! - [`deps`], [`validate`], [`diff`]: inspection of rendered templates
//! - [`config`], [`annotator`]: the stack definition itself and its presets
//!
//! # Variables Read by the CLI
//!
//! - `CDK_DEFAULT_ACCOUNT` - target account when `--account` is not given
//! - `CDK_DEFAULT_REGION` - target region when `--region` is not given

pub mod annotator;
pub mod cidr;
pub mod config;
pub mod deps;
pub mod diff;
pub mod error;
pub mod logical_id;
pub mod output;
pub mod resources;
pub mod stack;
pub mod template;
pub mod token;
pub mod validate;

pub use config::{StackConfig, Variant};
pub use error::{StackError, StackResult};
pub use stack::{Environment, Stack};
pub use template::Template;
