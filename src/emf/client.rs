//! GraphQL queries against the EMF management API
//!
//! Requests go through `curl` so that the same proxy and certificate setup
//! as the operator's shell applies. Bodies are built and decoded with
//! `serde_json`.

use crate::error::{DeployError, Result};
use crate::exec::{shell_quote, Runner};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// HTTPS port of the GraphQL endpoint
pub const API_PORT: u16 = 7443;

/// Seconds curl waits for the connection
pub const CONNECT_TIMEOUT: u32 = 3;

const STATUS_QUERY: &str =
    "query managerServiceStatus { managerServiceStatus { serviceStates { service state } running } }";
const FILESYSTEM_QUERY: &str = "query filesystem { filesystem { list { id name state } } }";

/// Top level GraphQL response
#[derive(Debug, Deserialize)]
struct Response<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ResponseError>,
}

#[derive(Debug, Deserialize)]
struct ResponseError {
    message: String,
}

/// State of one manager service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    /// Service name
    pub service: String,
    /// Service state
    pub state: String,
}

/// Manager service status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerServiceStatus {
    /// Per service states
    #[serde(default)]
    pub service_states: Vec<ServiceState>,
    /// Is the manager running
    pub running: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusData {
    manager_service_status: ManagerServiceStatus,
}

/// Filesystem known to EMF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filesystem {
    /// Filesystem id
    pub id: Value,
    /// Filesystem name
    pub name: String,
    /// Filesystem state
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FilesystemList {
    list: Vec<Filesystem>,
}

#[derive(Debug, Deserialize)]
struct FilesystemData {
    filesystem: FilesystemList,
}

/// Client mount information of one filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMount {
    /// Mount source (`<nids>:/<fs>`)
    pub mount_source: String,
    /// Full `mount -t lustre ...` command
    pub mount_command: String,
}

#[derive(Debug, Deserialize)]
struct ClientData {
    client: ClientMount,
}

/// Client for one EMF endpoint
pub struct EmfClient<'a> {
    runner: &'a Runner,
    host: String,
}

impl<'a> EmfClient<'a> {
    /// Create a client for `host` (IP or hostname)
    pub fn new(runner: &'a Runner, host: impl Into<String>) -> Self {
        Self {
            runner,
            host: host.into(),
        }
    }

    /// Endpoint host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// GraphQL URL
    pub fn url(&self) -> String {
        format!("https://{}:{}/graphql", self.host, API_PORT)
    }

    /// `curl` command line posting `body`
    pub fn command(&self, body: &Value) -> String {
        format!(
            "curl --connect-timeout {} -k -s -H {} -d {} {}",
            CONNECT_TIMEOUT,
            shell_quote("content-type:application/json; charset=utf-8"),
            shell_quote(&body.to_string()),
            shell_quote(&self.url())
        )
    }

    fn query<T: DeserializeOwned>(&self, query: &str) -> Result<T> {
        let body = json!({ "query": query });
        let out = self.runner.query(self.command(&body))?;
        if !out.success() {
            return Err(DeployError::Emf(format!(
                "{} unreachable (curl exit code {})",
                self.url(),
                out.code
            )));
        }
        decode(&out.output)
    }

    /// Manager service status
    pub fn status(&self) -> Result<ManagerServiceStatus> {
        self.query::<StatusData>(STATUS_QUERY)
            .map(|d| d.manager_service_status)
    }

    /// Does the endpoint answer the status query
    pub fn is_responsive(&self) -> bool {
        match self.status() {
            Ok(status) => {
                tracing::debug!("emf status at {}: {:?}", self.host, status);
                true
            }
            Err(e) => {
                tracing::info!("emf api is not responsive at {}: {}", self.host, e);
                false
            }
        }
    }

    /// Filesystems managed by EMF
    pub fn filesystems(&self) -> Result<Vec<Filesystem>> {
        self.query::<FilesystemData>(FILESYSTEM_QUERY)
            .map(|d| d.filesystem.list)
    }

    /// Mount information of `fs_name`
    pub fn client_mount(&self, fs_name: &str) -> Result<ClientMount> {
        let fs = serde_json::to_string(fs_name)?;
        let query = format!(
            "query client {{ client {{ mountSource(fsName: {fs}) mountCommand(fsName: {fs}) }} }}"
        );
        self.query::<ClientData>(&query).map(|d| d.client)
    }

    /// `(filesystem, mount command)` for every filesystem
    pub fn mount_commands(&self) -> Result<Vec<(String, String)>> {
        self.filesystems()?
            .into_iter()
            .map(|fs| {
                let mount = self.client_mount(&fs.name)?;
                Ok((fs.name, mount.mount_command))
            })
            .collect()
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    let response: Response<T> = serde_json::from_str(body.trim())?;
    if let Some(err) = response.errors.first() {
        return Err(DeployError::Emf(err.message.clone()));
    }
    response
        .data
        .ok_or_else(|| DeployError::Emf("response without data".to_string()))
}

/// Line printed for one filesystem
pub fn format_mount_line(fs_name: &str, command: &str) -> String {
    format!("{}  # Filesystem: {}", command, fs_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ScriptedShell;

    const STATUS: &str = r#"{"data":{"managerServiceStatus":{"serviceStates":[{"service":"emf-api","state":"active"}],"running":true}}}"#;
    const FILESYSTEMS: &str = r#"{"data":{"filesystem":{"list":[{"id":1,"name":"fs1","state":"available"},{"id":2,"name":"scratch","state":"unavailable"}]}}}"#;

    fn mount_response(fs: &str) -> String {
        json!({
            "data": {"client": {
                "mountSource": format!("10.0.0.1@o2ib:/{}", fs),
                "mountCommand": format!("mount -t lustre 10.0.0.1@o2ib:/{} /lustre/{}", fs, fs),
            }}
        })
        .to_string()
    }

    #[test]
    fn test_command_line() {
        let runner = Runner::new(Box::new(ScriptedShell::new()), false);
        let client = EmfClient::new(&runner, "10.0.0.10");
        let cmd = client.command(&json!({ "query": STATUS_QUERY }));
        assert!(cmd.starts_with("curl --connect-timeout 3 -k -s -H 'content-type:application/json; charset=utf-8' -d '{\"query\":"));
        assert!(cmd.ends_with(" https://10.0.0.10:7443/graphql"));
    }

    #[test]
    fn test_status() {
        let shell = ScriptedShell::new();
        shell.on("managerServiceStatus", 0, STATUS);
        let runner = Runner::new(Box::new(shell.clone()), true);
        let client = EmfClient::new(&runner, "emf");

        let status = client.status().unwrap();
        assert!(status.running);
        assert_eq!(status.service_states[0].service, "emf-api");
        // probes run in dry-run too
        assert!(shell.called("curl"));
    }

    #[test]
    fn test_unreachable_and_errors() {
        let runner = Runner::new(Box::new(ScriptedShell::with_default(28)), false);
        assert!(!EmfClient::new(&runner, "emf").is_responsive());

        let shell = ScriptedShell::new();
        shell.on("curl", 0, r#"{"errors":[{"message":"not authorized"}]}"#);
        let runner = Runner::new(Box::new(shell.clone()), false);
        let err = EmfClient::new(&runner, "emf").filesystems().unwrap_err();
        assert!(err.to_string().contains("not authorized"));

        let shell = ScriptedShell::new();
        shell.on("curl", 0, "<html>502 Bad Gateway</html>");
        let runner = Runner::new(Box::new(shell.clone()), false);
        assert!(EmfClient::new(&runner, "emf").status().is_err());
    }

    #[test]
    fn test_mount_commands() {
        let shell = ScriptedShell::new();
        shell
            .on("filesystem { list", 0, FILESYSTEMS)
            .on(r#"\"fs1\""#, 0, &mount_response("fs1"))
            .on(r#"\"scratch\""#, 0, &mount_response("scratch"));
        let runner = Runner::new(Box::new(shell.clone()), false);
        let client = EmfClient::new(&runner, "10.0.0.10");

        let mounts = client.mount_commands().unwrap();
        assert_eq!(
            mounts,
            vec![
                ("fs1".to_string(), "mount -t lustre 10.0.0.1@o2ib:/fs1 /lustre/fs1".to_string()),
                (
                    "scratch".to_string(),
                    "mount -t lustre 10.0.0.1@o2ib:/scratch /lustre/scratch".to_string()
                ),
            ]
        );
        assert_eq!(
            format_mount_line("fs1", &mounts[0].1),
            "mount -t lustre 10.0.0.1@o2ib:/fs1 /lustre/fs1  # Filesystem: fs1"
        );
    }
}
