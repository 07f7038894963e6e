// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The deployment config documents kept under `config/<key>.yaml` in the
//! image-builder repository.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_yaml::Value;

#[derive(Clone, Debug, Deserialize)]
pub struct DeploymentConfig {
    pub image: ImageDescriptor,
    pub iso: IsoDescriptor,
    #[serde(default)]
    pub target: Vec<Target>,
    #[serde(default)]
    pub manager: Manager,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ImageDescriptor {
    #[serde(deserialize_with = "scalar_string")]
    pub os: String,
    #[serde(deserialize_with = "scalar_string")]
    pub edition: String,
    #[serde(deserialize_with = "scalar_string")]
    pub language: String,
    #[serde(deserialize_with = "scalar_string")]
    pub architecture: String,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub timezone: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IsoDescriptor {
    pub source: IsoSource,
    #[serde(deserialize_with = "scalar_string")]
    pub wimindex: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct IsoSource {
    pub key: String,
}

impl IsoDescriptor {
    /// The file name of the source ISO, without its bucket path.
    pub fn file_name(&self) -> &str {
        camino::Utf8Path::new(&self.source.key)
            .file_name()
            .unwrap_or(&self.source.key)
    }
}

/// One resource group that machine images are built into.
#[derive(Clone, Debug, Deserialize)]
pub struct Target {
    pub group: String,
    #[serde(default)]
    pub region: String,
    pub machine: Option<Machine>,
    #[serde(default)]
    pub disk: Vec<Disk>,
    #[serde(default)]
    pub tag: Vec<Tag>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Machine {
    #[serde(deserialize_with = "scalar_string")]
    pub cpu: String,
    pub format: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Disk {
    #[serde(default)]
    pub variant: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default, deserialize_with = "optional_scalar_string")]
    pub value: Option<String>,
}

impl Target {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tag
            .iter()
            .find(|t| t.name == name)
            .and_then(|t| t.value.as_deref())
    }

    pub fn deployment_id(&self) -> Option<&str> {
        self.tag("deploymentId")
    }

    pub fn source_revision(&self) -> Option<&str> {
        self.tag("sourceRevision")
    }

    pub fn source_organisation(&self) -> Option<&str> {
        self.tag("sourceOrganisation")
    }

    pub fn source_repository(&self) -> Option<&str> {
        self.tag("sourceRepository")
    }

    /// The Azure location name for this target's region: lowercase with
    /// spaces removed ("East US 2" becomes "eastus2").
    pub fn location(&self) -> String {
        crate::util::normalize_location(&self.region)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Manager {
    #[serde(default)]
    pub pool: Vec<PoolDefinition>,
}

/// A worker pool as declared in the config.
#[derive(Clone, Debug, Deserialize)]
pub struct PoolDefinition {
    pub domain: String,
    pub variant: String,
    pub capacity: Capacity,
    #[serde(default)]
    pub locations: Vec<String>,
    pub lifecycle: Option<String>,
    pub owner: String,
    pub provider: String,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Capacity {
    pub minimum: u32,
    pub maximum: u32,
}

impl PoolDefinition {
    /// `domain/variant`, the worker pool id.
    pub fn id(&self) -> String {
        format!("{}/{}", self.domain, self.variant)
    }

    pub fn is_spot(&self) -> bool {
        self.lifecycle.as_deref() == Some("spot")
    }
}

impl DeploymentConfig {
    pub fn parse(document: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(document)
    }

    pub fn target(&self, group: &str) -> Option<&Target> {
        self.target.iter().find(|t| t.group == group)
    }

    pub fn pool(&self, id: &str) -> Option<&PoolDefinition> {
        self.manager.pool.iter().find(|p| p.id() == id)
    }
}

/// The tags of one target, read from the raw document. Only the `target`
/// list has to be well formed; other sections are never looked at.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetTags {
    tags: BTreeMap<String, String>,
}

impl TargetTags {
    /// Reads the tags of the target for `group`, or `None` if the document
    /// has no such target. Tags whose value isn't a scalar are left out.
    pub fn read(
        document: &str,
        group: &str,
    ) -> Result<Option<Self>, serde_yaml::Error> {
        let document: Value = serde_yaml::from_str(document)?;
        let target = document
            .get("target")
            .and_then(Value::as_sequence)
            .into_iter()
            .flatten()
            .find(|t| t.get("group").and_then(Value::as_str) == Some(group));
        let Some(target) = target else {
            return Ok(None);
        };

        let mut tags = BTreeMap::new();
        let listed = target.get("tag").and_then(Value::as_sequence);
        for tag in listed.into_iter().flatten() {
            let Some(name) = tag.get("name").and_then(Value::as_str) else {
                continue;
            };
            let value = tag.get("value").cloned().unwrap_or(Value::Null);
            if let Ok(Some(value)) = scalar_to_string(value) {
                tags.entry(name.to_string()).or_insert(value);
            }
        }

        Ok(Some(Self { tags }))
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    pub fn deployment_id(&self) -> Option<&str> {
        self.tag("deploymentId")
    }

    pub fn source_revision(&self) -> Option<&str> {
        self.tag("sourceRevision")
    }

    pub fn source_organisation(&self) -> Option<&str> {
        self.tag("sourceOrganisation")
    }

    pub fn source_repository(&self) -> Option<&str> {
        self.tag("sourceRepository")
    }
}

// YAML happily reads a tag value like `1234567` as an integer; these read any
// scalar back as text.

fn scalar_to_string(
    value: Value,
) -> Result<Option<String>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b.to_string())),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::String(s) => Ok(Some(s)),
        other => Err(format!("expected a scalar, found {other:?}")),
    }
}

fn optional_scalar_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(d)?;
    scalar_to_string(value).map_err(serde::de::Error::custom)
}

fn scalar_string<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    optional_scalar_string(d)?
        .ok_or_else(|| serde::de::Error::custom("expected a value, found null"))
}

#[cfg(test)]
pub(crate) const SAMPLE: &str = r#"
image:
  os: Windows 10
  edition: Professional
  language: en-US
  architecture: x86-64
  timezone: UTC
iso:
  source:
    platform: amazon
    bucket: windows-ami-builder
    key: iso/en_windows_10_business_editions_version_1903_x64_dvd_37200948.iso
  wimindex: 5
manager:
  pool:
    - domain: gecko-t
      variant: win10-64-azure
      capacity:
        minimum: 0
        maximum: 10
      locations:
        - centralus
        - eastus
      lifecycle: spot
      owner: grenade@mozilla.com
      provider: azure2
target:
  - platform: azure
    group: rg-central-us-gecko-t
    region: Central US
    machine:
      cpu: 2
      format: Standard_F{}s_v2
    disk:
      - os: true
        variant: ssd
    tag:
      - name: workerType
        value: gecko-t-win10-64-azure
      - name: sourceOrganisation
        value: mozilla-releng
      - name: sourceRepository
        value: OpenCloudConfig
      - name: sourceRevision
        value: 1234567
      - name: deploymentId
        value: 0a1b2c3
  - platform: azure
    group: rg-east-us-gecko-t
    region: East US
    machine:
      cpu: 4
      format: Standard_D{}s_v3
    disk:
      - os: true
        variant: hdd
    tag:
      - name: sourceRevision
        value: def5678
      - name: deploymentId
  - platform: azure
    group: rg-west-us-gecko-1
    region: West US
    machine:
      cpu: 2
      format: Standard_F{}s_v2
    tag:
      - name: sourceRevision
        value: def5678
"#;
