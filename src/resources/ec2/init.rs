//! First-boot bootstrap configuration (`AWS::CloudFormation::Init`).
//!
//! A [`CloudFormationInit`] holds named [`InitConfig`]s and named config sets,
//! each an ordered list of config names. The instance runs the selected sets
//! once at first boot and signals the outcome; every element is idempotent,
//! so a rerun converges on the same machine state.
//!
//! ```text
//! configSets.default = ["yumPreinstall", "config"]
//! yumPreinstall      -> packages.yum.git
//! config             -> files./etc/stack.json, groups.my-group, users.my-user, packages.rpm.*
//! ```

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{StackError, StackResult};

const DEFAULT_MODE: &str = "000644";
const DEFAULT_OWNER: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Yum,
    Apt,
    Python,
    RubyGems,
    Rpm,
    Msi,
}

impl PackageManager {
    fn key(&self) -> &'static str {
        match self {
            Self::Yum => "yum",
            Self::Apt => "apt",
            Self::Python => "python",
            Self::RubyGems => "rubygems",
            Self::Rpm => "rpm",
            Self::Msi => "msi",
        }
    }

    /// Archive installers take a location instead of a version list.
    fn is_archive(&self) -> bool {
        matches!(self, Self::Rpm | Self::Msi)
    }
}

/// An OS package, or a package archive downloaded from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPackage {
    pub manager: PackageManager,
    /// Package name, or the archive key for rpm/msi.
    pub name: String,
    pub versions: Vec<String>,
    pub location: Option<String>,
}

impl InitPackage {
    fn repo(manager: PackageManager, name: &str) -> Self {
        Self {
            manager,
            name: name.to_string(),
            versions: Vec::new(),
            location: None,
        }
    }

    pub fn yum(name: &str) -> Self {
        Self::repo(PackageManager::Yum, name)
    }

    pub fn apt(name: &str) -> Self {
        Self::repo(PackageManager::Apt, name)
    }

    pub fn python(name: &str) -> Self {
        Self::repo(PackageManager::Python, name)
    }

    pub fn rubygems(name: &str) -> Self {
        Self::repo(PackageManager::RubyGems, name)
    }

    pub fn with_versions(mut self, versions: &[&str]) -> Self {
        self.versions = versions.iter().map(|v| v.to_string()).collect();
        self
    }

    /// Install an RPM from a URL, keyed by the archive's file stem.
    pub fn rpm(url: &str) -> Self {
        Self::archive(PackageManager::Rpm, url, &archive_key(url, ".rpm"))
    }

    pub fn rpm_with_key(url: &str, key: &str) -> Self {
        Self::archive(PackageManager::Rpm, url, key)
    }

    pub fn msi(url: &str) -> Self {
        Self::archive(PackageManager::Msi, url, &archive_key(url, ".msi"))
    }

    fn archive(manager: PackageManager, url: &str, key: &str) -> Self {
        Self {
            manager,
            name: key.to_string(),
            versions: Vec::new(),
            location: Some(url.to_string()),
        }
    }
}

fn archive_key(url: &str, extension: &str) -> String {
    let file = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(url);
    file.strip_suffix(extension).unwrap_or(file).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileContent {
    /// A JSON document; tokens inside resolve at deploy time.
    Object(Map<String, Value>),
    Text(String),
    /// Fetched from a URL at boot.
    Url(String),
}

/// A file written on the instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InitFile {
    pub path: String,
    pub content: FileContent,
    pub mode: String,
    pub owner: String,
    pub group: String,
}

impl InitFile {
    fn with_content(path: &str, content: FileContent) -> Self {
        Self {
            path: path.to_string(),
            content,
            mode: DEFAULT_MODE.to_string(),
            owner: DEFAULT_OWNER.to_string(),
            group: DEFAULT_OWNER.to_string(),
        }
    }

    pub fn from_object<K: Into<String>>(path: &str, fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        let object = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::with_content(path, FileContent::Object(object))
    }

    pub fn from_string(path: &str, text: &str) -> Self {
        Self::with_content(path, FileContent::Text(text.to_string()))
    }

    pub fn from_url(path: &str, url: &str) -> Self {
        Self::with_content(path, FileContent::Url(url.to_string()))
    }

    pub fn with_mode(mut self, mode: &str) -> Self {
        self.mode = mode.to_string();
        self
    }

    pub fn with_owner(mut self, owner: &str, group: &str) -> Self {
        self.owner = owner.to_string();
        self.group = group.to_string();
        self
    }

    fn render(&self) -> Value {
        let mut file = json!({
            "group": self.group,
            "mode": self.mode,
            "owner": self.owner
        });
        match &self.content {
            FileContent::Object(object) => file["content"] = Value::Object(object.clone()),
            FileContent::Text(text) => {
                file["content"] = json!(text);
                file["encoding"] = json!("plain");
            }
            FileContent::Url(url) => file["source"] = json!(url),
        }
        file
    }
}

/// An archive downloaded and unpacked into a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSource {
    pub target_dir: String,
    pub url: String,
}

impl InitSource {
    pub fn from_url(target_dir: &str, url: &str) -> Self {
        Self {
            target_dir: target_dir.to_string(),
            url: url.to_string(),
        }
    }

    /// A GitHub repository tarball at `refspec`.
    pub fn from_git_hub(target_dir: &str, owner: &str, repo: &str, refspec: &str) -> Self {
        Self::from_url(
            target_dir,
            &format!("https://github.com/{}/{}/tarball/{}", owner, repo, refspec),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitGroup {
    pub name: String,
    pub gid: Option<u32>,
}

impl InitGroup {
    pub fn from_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            gid: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitUser {
    pub name: String,
    pub uid: Option<u32>,
    pub groups: Vec<String>,
    pub home_dir: Option<String>,
}

impl InitUser {
    pub fn from_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: None,
            groups: Vec::new(),
            home_dir: None,
        }
    }

    pub fn in_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitCommand {
    pub command: String,
    pub cwd: Option<String>,
}

impl InitCommand {
    pub fn shell(command: &str) -> Self {
        Self {
            command: command.to_string(),
            cwd: None,
        }
    }
}

/// One idempotent bootstrap action.
#[derive(Debug, Clone, PartialEq)]
pub enum InitElement {
    Package(InitPackage),
    File(InitFile),
    Source(InitSource),
    Group(InitGroup),
    User(InitUser),
    Command(InitCommand),
}

impl From<InitPackage> for InitElement {
    fn from(v: InitPackage) -> Self {
        Self::Package(v)
    }
}

impl From<InitFile> for InitElement {
    fn from(v: InitFile) -> Self {
        Self::File(v)
    }
}

impl From<InitSource> for InitElement {
    fn from(v: InitSource) -> Self {
        Self::Source(v)
    }
}

impl From<InitGroup> for InitElement {
    fn from(v: InitGroup) -> Self {
        Self::Group(v)
    }
}

impl From<InitUser> for InitElement {
    fn from(v: InitUser) -> Self {
        Self::User(v)
    }
}

impl From<InitCommand> for InitElement {
    fn from(v: InitCommand) -> Self {
        Self::Command(v)
    }
}

/// An ordered list of bootstrap actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitConfig {
    elements: Vec<InitElement>,
}

impl InitConfig {
    pub fn new(elements: Vec<InitElement>) -> Self {
        Self { elements }
    }

    pub fn add(&mut self, element: impl Into<InitElement>) {
        self.elements.push(element.into());
    }

    pub fn elements(&self) -> &[InitElement] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Render in cfn-init's sectioned layout. Empty sections are omitted.
    pub fn render(&self) -> Value {
        let mut packages: BTreeMap<&str, Map<String, Value>> = BTreeMap::new();
        let mut files = Map::new();
        let mut sources = Map::new();
        let mut groups = Map::new();
        let mut users = Map::new();
        let mut commands = Map::new();
        // cfn-init runs commands in key order, so every key gets the same width.
        let command_count = self
            .elements
            .iter()
            .filter(|e| matches!(e, InitElement::Command(_)))
            .count();
        let command_width = command_count.saturating_sub(1).to_string().len().max(3);

        for element in &self.elements {
            match element {
                InitElement::Package(pkg) => {
                    let value = match (&pkg.location, pkg.manager.is_archive()) {
                        (Some(location), true) => json!(location),
                        _ => json!(pkg.versions),
                    };
                    packages
                        .entry(pkg.manager.key())
                        .or_default()
                        .insert(pkg.name.clone(), value);
                }
                InitElement::File(file) => {
                    files.insert(file.path.clone(), file.render());
                }
                InitElement::Source(source) => {
                    sources.insert(source.target_dir.clone(), json!(source.url));
                }
                InitElement::Group(group) => {
                    let mut value = json!({});
                    if let Some(gid) = group.gid {
                        value["gid"] = json!(gid.to_string());
                    }
                    groups.insert(group.name.clone(), value);
                }
                InitElement::User(user) => {
                    let mut value = json!({});
                    if let Some(uid) = user.uid {
                        value["uid"] = json!(uid.to_string());
                    }
                    value["groups"] = json!(user.groups);
                    if let Some(home) = &user.home_dir {
                        value["homeDir"] = json!(home);
                    }
                    users.insert(user.name.clone(), value);
                }
                InitElement::Command(cmd) => {
                    let key = format!("{:0width$}", commands.len(), width = command_width);
                    let mut value = json!({ "command": cmd.command });
                    if let Some(cwd) = &cmd.cwd {
                        value["cwd"] = json!(cwd);
                    }
                    commands.insert(key, value);
                }
            }
        }

        let mut rendered = Map::new();
        if !packages.is_empty() {
            let packages: Map<String, Value> = packages
                .into_iter()
                .map(|(manager, pkgs)| (manager.to_string(), Value::Object(pkgs)))
                .collect();
            rendered.insert("packages".to_string(), Value::Object(packages));
        }
        for (section, entries) in [
            ("files", files),
            ("sources", sources),
            ("groups", groups),
            ("users", users),
            ("commands", commands),
        ] {
            if !entries.is_empty() {
                rendered.insert(section.to_string(), Value::Object(entries));
            }
        }
        Value::Object(rendered)
    }
}

/// Named configs plus the config sets that order them.
#[derive(Debug, Clone, PartialEq)]
pub struct CloudFormationInit {
    config_sets: BTreeMap<String, Vec<String>>,
    configs: BTreeMap<String, InitConfig>,
}

impl CloudFormationInit {
    pub const DEFAULT_SET: &'static str = "default";

    /// A single config named `config` in the `default` set.
    pub fn from_config(config: InitConfig) -> Self {
        Self {
            config_sets: BTreeMap::from([(Self::DEFAULT_SET.to_string(), vec!["config".to_string()])]),
            configs: BTreeMap::from([("config".to_string(), config)]),
        }
    }

    pub fn from_elements(elements: Vec<InitElement>) -> Self {
        Self::from_config(InitConfig::new(elements))
    }

    /// Build from explicit config sets. Every name a set lists must be a declared config.
    pub fn from_config_sets<'a>(
        config_sets: impl IntoIterator<Item = (&'a str, Vec<&'a str>)>,
        configs: impl IntoIterator<Item = (&'a str, InitConfig)>,
    ) -> StackResult<Self> {
        let configs: BTreeMap<String, InitConfig> = configs
            .into_iter()
            .map(|(name, config)| (name.to_string(), config))
            .collect();

        let mut sets = BTreeMap::new();
        for (set, names) in config_sets {
            for name in &names {
                if !configs.contains_key(*name) {
                    return Err(StackError::UnknownInitConfig {
                        set: set.to_string(),
                        config: name.to_string(),
                    });
                }
            }
            sets.insert(
                set.to_string(),
                names.into_iter().map(str::to_string).collect(),
            );
        }

        Ok(Self {
            config_sets: sets,
            configs,
        })
    }

    pub fn config_sets(&self) -> &BTreeMap<String, Vec<String>> {
        &self.config_sets
    }

    pub fn config(&self, name: &str) -> Option<&InitConfig> {
        self.configs.get(name)
    }

    /// Fail if the options select a set that does not exist.
    pub fn check_options(&self, options: &InitOptions) -> StackResult<()> {
        match options
            .config_sets
            .iter()
            .find(|set| !self.config_sets.contains_key(*set))
        {
            Some(missing) => Err(StackError::UnknownConfigSet(missing.clone())),
            None => Ok(()),
        }
    }

    /// The `AWS::CloudFormation::Init` metadata value.
    pub fn render(&self) -> Value {
        let mut rendered = Map::new();
        rendered.insert("configSets".to_string(), json!(self.config_sets));
        for (name, config) in &self.configs {
            rendered.insert(name.clone(), config.render());
        }
        Value::Object(rendered)
    }

    /// Short content hash, embedded in the user data so a metadata-only
    /// change still shows up as an instance update.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.render().to_string().as_bytes());
        hex::encode(digest)[..16].to_string()
    }
}

/// How the instance applies its init config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOptions {
    pub config_sets: Vec<String>,
    /// How long the engine waits for the success signal.
    pub timeout: Duration,
    /// Signal success even when a step fails.
    pub ignore_failures: bool,
    /// Copy the cfn-init log to the console output.
    pub print_log: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            config_sets: vec![CloudFormationInit::DEFAULT_SET.to_string()],
            timeout: Duration::from_secs(5 * 60),
            ignore_failures: false,
            print_log: true,
        }
    }
}

impl InitOptions {
    /// The timeout as an ISO-8601 duration, e.g. `PT30M`.
    pub fn timeout_iso8601(&self) -> String {
        let total = self.timeout.as_secs();
        let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
        let mut out = String::from("PT");
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if seconds > 0 || total == 0 {
            out.push_str(&format!("{}S", seconds));
        }
        out
    }
}
