// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Managed images and snapshots, via the Azure Resource Manager REST API.

use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context as _, Result};
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use tracing::debug;

use crate::{refs::ResourceGroup, taskcluster::AzureCredentials};

const MANAGEMENT_URL: &str = "https://management.azure.com";
const LOGIN_URL: &str = "https://login.microsoftonline.com";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Snapshot,
}

impl ResourceKind {
    fn collection(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Snapshot => "snapshots",
        }
    }

    fn api_version(self) -> &'static str {
        match self {
            Self::Image => "2024-03-01",
            Self::Snapshot => "2023-10-02",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Image => "image",
            Self::Snapshot => "snapshot",
        })
    }
}

/// An image or snapshot as listed by the resource manager.
#[derive(Clone, Debug)]
pub struct ManagedResource {
    pub id: String,
    pub name: String,
    pub location: String,
    pub tags: BTreeMap<String, String>,

    /// The resource exactly as it was listed. Updates write this back with
    /// only the tags replaced.
    pub body: serde_json::Value,
}

impl ManagedResource {
    fn from_body(body: serde_json::Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct Header {
            id: String,
            name: String,
            #[serde(default)]
            location: String,
            #[serde(default)]
            tags: Option<BTreeMap<String, String>>,
        }

        let header = Header::deserialize(&body)
            .context("reading id, name and tags of listed resource")?;
        Ok(Self {
            id: header.id,
            name: header.name,
            location: header.location,
            tags: header.tags.unwrap_or_default(),
            body,
        })
    }
}

pub trait ComputeClient {
    /// Lists every resource of `kind` in `group`.
    fn list(
        &self,
        group: &ResourceGroup,
        kind: ResourceKind,
    ) -> Result<Vec<ManagedResource>>;

    /// Replaces the tags of `resource` with `tags`.
    fn update_tags(
        &self,
        group: &ResourceGroup,
        kind: ResourceKind,
        resource: &ManagedResource,
        tags: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// `/subscriptions/<sub>/resourceGroups/<group>/providers/Microsoft.Compute/<kind>`
fn collection_path(
    subscription: &str,
    group: &ResourceGroup,
    kind: ResourceKind,
) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/{}",
        subscription,
        group,
        kind.collection()
    )
}

pub struct AzureCompute {
    client: Client,
    subscription: String,
    token: String,
}

impl AzureCompute {
    /// Signs in with the service principal in `credentials` and returns a
    /// client for its subscription.
    pub fn connect(
        credentials: &AzureCredentials,
        timeout: Duration,
    ) -> Result<Self> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let client = Client::builder().timeout(timeout).build()?;
        let url =
            format!("{}/{}/oauth2/v2.0/token", LOGIN_URL, credentials.account);
        let response = client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", credentials.id.as_str()),
                ("client_secret", credentials.key.as_str()),
                ("scope", "https://management.azure.com/.default"),
            ])
            .send()
            .context("requesting Azure access token")?;
        let token: TokenResponse = check(response)
            .context("requesting Azure access token")?
            .json()
            .context("reading Azure access token")?;

        Ok(Self {
            client,
            subscription: credentials.subscription.clone(),
            token: token.access_token,
        })
    }
}

fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().unwrap_or_default();
    anyhow::bail!("{url} returned {status}: {body}");
}

impl ComputeClient for AzureCompute {
    fn list(
        &self,
        group: &ResourceGroup,
        kind: ResourceKind,
    ) -> Result<Vec<ManagedResource>> {
        #[derive(Deserialize)]
        struct Page {
            #[serde(default)]
            value: Vec<serde_json::Value>,
            #[serde(rename = "nextLink")]
            next_link: Option<String>,
        }

        let mut resources = Vec::new();
        let mut next = Some(format!(
            "{}{}?api-version={}",
            MANAGEMENT_URL,
            collection_path(&self.subscription, group, kind),
            kind.api_version()
        ));

        while let Some(url) = next.take() {
            debug!(%url, "listing {kind}s");
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .send()
                .with_context(|| format!("listing {kind}s in {group}"))?;
            let page: Page = check(response)
                .with_context(|| format!("listing {kind}s in {group}"))?
                .json()?;

            for body in page.value {
                resources.push(ManagedResource::from_body(body)?);
            }
            next = page.next_link;
        }

        Ok(resources)
    }

    fn update_tags(
        &self,
        group: &ResourceGroup,
        kind: ResourceKind,
        resource: &ManagedResource,
        tags: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut body = resource.body.clone();
        if let Some(object) = body.as_object_mut() {
            object.insert("tags".to_string(), serde_json::to_value(tags)?);
        }

        let url = format!(
            "{}{}/{}?api-version={}",
            MANAGEMENT_URL,
            collection_path(&self.subscription, group, kind),
            resource.name,
            kind.api_version()
        );
        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .with_context(|| format!("updating {kind} {}", resource.name))?;
        check(response)
            .with_context(|| format!("updating {kind} {}", resource.name))?;
        Ok(())
    }
}

/// Picks the newest builder-made image in a list: the one with the latest
/// `diskImageCommitTime` tag among those `is_builder_image` accepts.
pub fn latest_image<'a>(
    images: &'a [ManagedResource],
    is_builder_image: impl Fn(&str) -> bool,
) -> Option<&'a ManagedResource> {
    images
        .iter()
        .filter(|image| is_builder_image(&image.name))
        .max_by(|a, b| {
            a.tags
                .get("diskImageCommitTime")
                .cmp(&b.tags.get("diskImageCommitTime"))
        })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn listed_resource_keeps_its_body() {
        let body = serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/rg-a/providers/Microsoft.Compute/images/a",
            "name": "a",
            "location": "eastus",
            "tags": { "os": "Windows 10" },
            "properties": { "provisioningState": "Succeeded" }
        });
        let resource = ManagedResource::from_body(body.clone()).unwrap();
        assert_eq!(resource.name, "a");
        assert_eq!(resource.tags["os"], "Windows 10");
        assert_eq!(resource.body, body);

        let untagged =
            ManagedResource::from_body(serde_json::json!({"id": "x", "name": "x"}))
                .unwrap();
        assert!(untagged.tags.is_empty());
    }

    #[test]
    fn collection_paths() {
        let group = ResourceGroup::new("rg-east-us-gecko-t").unwrap();
        assert_eq!(
            collection_path("sub", &group, ResourceKind::Snapshot),
            "/subscriptions/sub/resourceGroups/rg-east-us-gecko-t/providers/\
             Microsoft.Compute/snapshots"
        );
    }

    #[test]
    fn latest_image_uses_commit_time_tag() {
        let image = |name: &str, time: Option<&str>| ManagedResource {
            id: name.to_string(),
            name: name.to_string(),
            location: "eastus".to_string(),
            tags: time
                .map(|t| [("diskImageCommitTime".to_string(), t.to_string())])
                .into_iter()
                .flatten()
                .collect(),
            body: serde_json::Value::Null,
        };
        let images = vec![
            image("a-old", Some("2020-01-01T00:00:00Z")),
            image("a-new", Some("2020-03-01T00:00:00Z")),
            image("a-untagged", None),
            image("other", Some("2021-01-01T00:00:00Z")),
        ];

        let latest = latest_image(&images, |n| n.starts_with("a-")).unwrap();
        assert_eq!(latest.name, "a-new");
        assert!(latest_image(&images, |_| false).is_none());
    }
}
