//! GraphQL lookups for module metadata.

use crate::{ControlPlaneClient, Error, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

/// Module metadata the registry needs to resolve a download.
#[derive(Debug, Clone, Default)]
pub struct ModuleDefinition {
    pub organization_id: String,
    pub source: String,
    pub folder: String,
    pub tag_prefix: String,
    /// VCS identity id, when the module is bound to one.
    pub vcs_id: String,
    pub vcs_type: String,
    /// SSH identity, when the module is bound to one.
    pub ssh_type: String,
    pub ssh_private_key: String,
}

fn versions_query(organization: &str, name: &str, provider: &str) -> String {
    format!(
        r#"{{
  organization(filter: "name=={organization}") {{
    edges {{ node {{
      id
      module(filter: "name=={name};provider=={provider}") {{
        edges {{ node {{
          version {{ edges {{ node {{ version }} }} }}
        }} }}
      }}
    }} }}
  }}
}}"#
    )
}

fn module_query(organization: &str, name: &str, provider: &str) -> String {
    format!(
        r#"{{
  organization(filter: "name=={organization}") {{
    edges {{ node {{
      id
      module(filter: "name=={name};provider=={provider}") {{
        edges {{ node {{
          source
          folder
          tagPrefix
          vcs {{ edges {{ node {{ id vcsType }} }} }}
          ssh {{ edges {{ node {{ sshType privateKey }} }} }}
        }} }}
      }}
    }} }}
  }}
}}"#
    )
}

impl ControlPlaneClient {
    fn graphql_url(&self) -> String {
        format!("{}/graphql/api/v1", self.api_url())
    }

    async fn execute_query(&self, query: String) -> Result<Value> {
        let token = self.bearer()?;
        let response = self
            .http
            .post(self.graphql_url())
            .bearer_auth(token)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        let response = Self::check(response).await?;

        let body: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;
        if let Some(error) = body.errors.first() {
            return Err(Error::GraphQl(error.message.clone()));
        }
        Ok(body.data)
    }

    /// Published versions of a module, newest ordering left to the caller.
    pub async fn get_module_versions(
        &self,
        organization: &str,
        name: &str,
        provider: &str,
    ) -> Result<Vec<String>> {
        let data = self
            .execute_query(versions_query(organization, name, provider))
            .await?;

        let mut versions = Vec::new();
        for org_edge in data["organization"]["edges"].as_array().unwrap_or(&vec![]) {
            for module_edge in org_edge["node"]["module"]["edges"].as_array().unwrap_or(&vec![]) {
                for version_edge in module_edge["node"]["version"]["edges"]
                    .as_array()
                    .unwrap_or(&vec![])
                {
                    if let Some(version) = version_edge["node"]["version"].as_str() {
                        versions.push(version.to_string());
                    }
                }
            }
        }

        debug!(name, provider, count = versions.len(), "resolved module versions");
        Ok(versions)
    }

    /// Source coordinates and bound credentials of a module.
    pub async fn get_module(
        &self,
        organization: &str,
        name: &str,
        provider: &str,
    ) -> Result<ModuleDefinition> {
        let data = self
            .execute_query(module_query(organization, name, provider))
            .await?;

        let org_edges = data["organization"]["edges"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for org_edge in org_edges {
            let org_id = org_edge["node"]["id"].as_str().unwrap_or_default();
            if let Some(module_edge) = org_edge["node"]["module"]["edges"]
                .as_array()
                .and_then(|edges| edges.first())
            {
                let node = &module_edge["node"];
                let vcs_node = node["vcs"]["edges"].get(0).map(|edge| &edge["node"]);
                let ssh_node = node["ssh"]["edges"].get(0).map(|edge| &edge["node"]);

                return Ok(ModuleDefinition {
                    organization_id: org_id.to_string(),
                    source: node["source"].as_str().unwrap_or_default().to_string(),
                    folder: node["folder"].as_str().unwrap_or_default().to_string(),
                    tag_prefix: node["tagPrefix"].as_str().unwrap_or_default().to_string(),
                    vcs_id: vcs_node
                        .and_then(|n| n["id"].as_str())
                        .unwrap_or_default()
                        .to_string(),
                    vcs_type: vcs_node
                        .and_then(|n| n["vcsType"].as_str())
                        .unwrap_or_default()
                        .to_string(),
                    ssh_type: ssh_node
                        .and_then(|n| n["sshType"].as_str())
                        .unwrap_or_default()
                        .to_string(),
                    ssh_private_key: ssh_node
                        .and_then(|n| n["privateKey"].as_str())
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }

        Err(Error::ModuleNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_embed_filters() {
        let q = versions_query("acme", "vpc", "aws");
        assert!(q.contains(r#"name==acme"#));
        assert!(q.contains(r#"name==vpc;provider==aws"#));

        let q = module_query("acme", "vpc", "aws");
        assert!(q.contains("tagPrefix"));
        assert!(q.contains("privateKey"));
    }
}
