//! Stack configuration.
//!
//! Two presets cover the known deployments: `base` (SSH only, private subnet)
//! and `extended` (web ports, public subnet, key pair, bigger volume). A TOML
//! file can override any field of the selected preset:
//!
//! ```toml
//! variant = "extended"
//! region = "eu-west-1"
//! ingress_ports = [22, 8080]
//! volume_size_gib = 200
//! ```
//!
//! Precedence, lowest first: preset, file, command-line flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::resources::RemovalPolicy;
use crate::resources::ec2::{AmazonLinuxGeneration, SubnetType};
use crate::validate::Expectations;

pub const DEFAULT_STACK_NAME: &str = "CocoAnnotatorStack";
const DEFAULT_INSTANCE_TYPE: &str = "t2.medium";
const RUBYGEM_GIT_RPM: &str = "http://mirrors.ukfast.co.uk/sites/dl.fedoraproject.org/pub/epel/8/Everything/x86_64/Packages/r/rubygem-git-1.5.0-2.el8.noarch.rpm";

/// Which preset to start from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Base,
    Extended,
}

/// Everything the annotator stack definition is parameterized by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackConfig {
    pub variant: Variant,
    pub stack_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Fixed bucket name; generated by the engine when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    pub bucket_removal_policy: RemovalPolicy,
    /// TCP ports open to the world.
    pub ingress_ports: Vec<u16>,
    pub subnet: SubnetType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    pub instance_type: String,
    pub image_generation: AmazonLinuxGeneration,
    pub yum_packages: Vec<String>,
    pub rpm_urls: Vec<String>,
    pub volume_size_gib: u32,
    /// Volume zone. Defaults to the instance's zone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    pub bootstrap_timeout_minutes: u64,
    pub max_azs: usize,
}

impl StackConfig {
    pub fn preset(variant: Variant) -> Self {
        let base = Self {
            variant,
            stack_name: DEFAULT_STACK_NAME.to_string(),
            account: None,
            region: None,
            bucket_name: None,
            bucket_removal_policy: RemovalPolicy::Retain,
            ingress_ports: vec![22],
            subnet: SubnetType::Private,
            key_name: None,
            instance_type: DEFAULT_INSTANCE_TYPE.to_string(),
            image_generation: AmazonLinuxGeneration::AmazonLinux,
            yum_packages: vec!["git".to_string()],
            rpm_urls: vec![RUBYGEM_GIT_RPM.to_string()],
            volume_size_gib: 30,
            availability_zone: None,
            bootstrap_timeout_minutes: 30,
            max_azs: 2,
        };
        match variant {
            Variant::Base => base,
            Variant::Extended => Self {
                bucket_name: Some("coco-annotator-data".to_string()),
                ingress_ports: vec![22, 80, 443],
                subnet: SubnetType::Public,
                key_name: Some("coco-annotator-key".to_string()),
                yum_packages: ["git", "docker", "python3"].map(String::from).to_vec(),
                volume_size_gib: 100,
                ..base
            },
        }
    }

    /// Resolve the effective configuration.
    ///
    /// `variant` wins over a `variant` key in the file; with neither, `base`.
    pub fn load(variant: Option<Variant>, path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => StackToml::read(path)?,
            None => StackToml::default(),
        };
        Ok(Self::layered(variant, file))
    }

    pub fn from_toml_str(variant: Option<Variant>, content: &str) -> Result<Self> {
        let file: StackToml = toml::from_str(content).context("Failed to parse stack config")?;
        Ok(Self::layered(variant, file))
    }

    fn layered(variant: Option<Variant>, file: StackToml) -> Self {
        let mut config = Self::preset(variant.or(file.variant).unwrap_or_default());
        file.apply(&mut config);
        config
    }

    /// Apply command-line overrides. `None` keeps the current value.
    pub fn with_overrides(
        mut self,
        stack_name: Option<String>,
        account: Option<String>,
        region: Option<String>,
    ) -> Self {
        if let Some(name) = stack_name {
            self.stack_name = name;
        }
        if account.is_some() {
            self.account = account;
        }
        if region.is_some() {
            self.region = region;
        }
        self
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize stack config")
    }

    /// Properties a template rendered from this config must satisfy.
    pub fn expectations(&self) -> Expectations {
        Expectations {
            ingress_ports: Some(self.ingress_ports.iter().copied().collect::<BTreeSet<_>>()),
            region: self.region.clone(),
            subnet_type: Some(self.subnet),
            key_name: self.key_name.clone(),
            account: self.account.clone(),
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self::preset(Variant::Base)
    }
}

/// On-disk form: every field optional, layered over a preset.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StackToml {
    variant: Option<Variant>,
    stack_name: Option<String>,
    account: Option<String>,
    region: Option<String>,
    bucket_name: Option<String>,
    bucket_removal_policy: Option<RemovalPolicy>,
    ingress_ports: Option<Vec<u16>>,
    subnet: Option<SubnetType>,
    key_name: Option<String>,
    instance_type: Option<String>,
    image_generation: Option<AmazonLinuxGeneration>,
    yum_packages: Option<Vec<String>>,
    rpm_urls: Option<Vec<String>>,
    volume_size_gib: Option<u32>,
    availability_zone: Option<String>,
    bootstrap_timeout_minutes: Option<u64>,
    max_azs: Option<usize>,
}

impl StackToml {
    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stack config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse stack config: {}", path.display()))
    }

    fn apply(self, config: &mut StackConfig) {
        if let Some(v) = self.stack_name {
            config.stack_name = v;
        }
        if self.account.is_some() {
            config.account = self.account;
        }
        if self.region.is_some() {
            config.region = self.region;
        }
        if self.bucket_name.is_some() {
            config.bucket_name = self.bucket_name;
        }
        if let Some(v) = self.bucket_removal_policy {
            config.bucket_removal_policy = v;
        }
        if let Some(v) = self.ingress_ports {
            config.ingress_ports = v;
        }
        if let Some(v) = self.subnet {
            config.subnet = v;
        }
        if self.key_name.is_some() {
            config.key_name = self.key_name;
        }
        if let Some(v) = self.instance_type {
            config.instance_type = v;
        }
        if let Some(v) = self.image_generation {
            config.image_generation = v;
        }
        if let Some(v) = self.yum_packages {
            config.yum_packages = v;
        }
        if let Some(v) = self.rpm_urls {
            config.rpm_urls = v;
        }
        if let Some(v) = self.volume_size_gib {
            config.volume_size_gib = v;
        }
        if self.availability_zone.is_some() {
            config.availability_zone = self.availability_zone;
        }
        if let Some(v) = self.bootstrap_timeout_minutes {
            config.bootstrap_timeout_minutes = v;
        }
        if let Some(v) = self.max_azs {
            config.max_azs = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_presets_differ_where_expected() {
        let base = StackConfig::preset(Variant::Base);
        let extended = StackConfig::preset(Variant::Extended);

        assert_eq!(base.ingress_ports, vec![22]);
        assert_eq!(extended.ingress_ports, vec![22, 80, 443]);
        assert_eq!(base.subnet, SubnetType::Private);
        assert_eq!(extended.subnet, SubnetType::Public);
        assert!(base.key_name.is_none());
        assert_eq!(extended.key_name.as_deref(), Some("coco-annotator-key"));
        assert_eq!((base.volume_size_gib, extended.volume_size_gib), (30, 100));

        assert_eq!(base.stack_name, extended.stack_name);
        assert_eq!(base.instance_type, extended.instance_type);
        assert_eq!(base.rpm_urls, extended.rpm_urls);
        assert_eq!(base.bootstrap_timeout_minutes, 30);
    }

    #[test]
    fn test_file_overrides_preset() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "variant = \"extended\"\nregion = \"eu-west-1\"\nvolume_size_gib = 200").unwrap();

        let config = StackConfig::load(None, Some(file.path())).unwrap();
        assert_eq!(config.variant, Variant::Extended);
        assert_eq!(config.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.volume_size_gib, 200);
        // Untouched fields keep the preset value.
        assert_eq!(config.ingress_ports, vec![22, 80, 443]);
    }

    #[test]
    fn test_explicit_variant_beats_file() {
        let config = StackConfig::from_toml_str(Some(Variant::Base), "variant = \"extended\"").unwrap();
        assert_eq!(config.variant, Variant::Base);
        assert_eq!(config.ingress_ports, vec![22]);
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = StackConfig::from_toml_str(None, "region = \"us-west-2\"")
            .unwrap()
            .with_overrides(Some("Other".into()), Some("123456789012".into()), None);
        assert_eq!(config.stack_name, "Other");
        assert_eq!(config.account.as_deref(), Some("123456789012"));
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = StackConfig::from_toml_str(None, "volume_size = 3").unwrap_err();
        assert!(format!("{:#}", err).contains("volume_size"));
    }

    #[test]
    fn test_missing_file() {
        let err = StackConfig::load(None, Some(Path::new("/nonexistent/stack.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read stack config"));
    }

    #[test]
    fn test_toml_roundtrip_of_effective_config() {
        let config = StackConfig::preset(Variant::Extended).with_overrides(None, None, Some("ap-south-1".into()));
        let text = config.to_toml().unwrap();
        assert!(text.contains("variant = \"extended\""));
        assert_eq!(StackConfig::from_toml_str(None, &text).unwrap(), config);
    }

    #[test]
    fn test_expectations() {
        let expect = StackConfig::preset(Variant::Extended).expectations();
        assert_eq!(expect.ingress_ports, Some(BTreeSet::from([22, 80, 443])));
        assert_eq!(expect.subnet_type, Some(SubnetType::Public));
        assert_eq!(expect.key_name.as_deref(), Some("coco-annotator-key"));
        assert_eq!(expect.account, None);

        let pinned = StackConfig::default()
            .with_overrides(None, Some("123456789012".into()), None)
            .expectations();
        assert_eq!(pinned.account.as_deref(), Some("123456789012"));
    }
}
