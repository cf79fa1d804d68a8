//! `helm` subprocess client

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use kxi_core::{ChartVersion, HelmRevision, InstalledRelease};

use super::{HelmClient, InstallRequest, RepoEntry, chart_basename};
use crate::error::{KubeError, Result};

/// Runs the `helm` binary
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self::new("helm")
    }
}

/// Arguments for one invocation, with an optional value hidden from logs
struct Invocation<'a> {
    args: Vec<String>,
    stdin: Option<&'a str>,
    secret: Option<&'a str>,
}

impl<'a> Invocation<'a> {
    fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            secret: None,
        }
    }

    fn stdin(mut self, input: Option<&'a str>) -> Self {
        self.stdin = input;
        self
    }

    fn secret(mut self, value: Option<&'a str>) -> Self {
        self.secret = value;
        self
    }

    /// Command line with the secret masked
    fn display(&self) -> String {
        let mut parts = vec!["helm".to_string()];
        parts.extend(self.args.iter().map(|a| match self.secret {
            Some(secret) if !secret.is_empty() && a == secret => "*".repeat(secret.len()),
            _ => a.clone(),
        }));
        parts.join(" ")
    }
}

impl HelmCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, invocation: Invocation<'_>) -> Result<String> {
        let command_line = invocation.display();
        tracing::debug!(command = %command_line, "running helm");

        let mut child = Command::new(&self.binary)
            .args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KubeError::HelmUnavailable(e.to_string()))?;

        if let (Some(input), Some(mut stdin)) = (invocation.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(command = %command_line, status = ?output.status.code(), "helm failed");
            return Err(KubeError::Helm {
                command: command_line,
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse<T: serde::de::DeserializeOwned>(stdout: &str) -> Result<Vec<T>> {
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(trimmed)?)
    }
}

#[async_trait]
impl HelmClient for HelmCli {
    async fn repo_list(&self) -> Result<Vec<RepoEntry>> {
        match self.run(Invocation::new(["repo", "list", "-o", "json"])).await {
            Ok(stdout) => Self::parse(&stdout),
            Err(KubeError::Helm { stderr, .. }) if stderr.contains("no repositories") => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn repo_add(
        &self,
        name: &str,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<()> {
        let mut args = vec!["repo".to_string(), "add".to_string()];
        if let Some(user) = username {
            args.extend(["--username".to_string(), user.to_string()]);
        }
        if let Some(pass) = password {
            args.extend(["--password".to_string(), pass.to_string()]);
        }
        args.extend([name.to_string(), url.to_string()]);

        self.run(Invocation::new(args).secret(password)).await?;
        Ok(())
    }

    async fn repo_update(&self) -> Result<()> {
        self.run(Invocation::new(["repo", "update"])).await?;
        Ok(())
    }

    async fn search(
        &self,
        chart: &str,
        version: Option<&str>,
        all_versions: bool,
    ) -> Result<Vec<ChartVersion>> {
        let mut args = vec!["search".to_string(), "repo".to_string(), chart.to_string()];
        if let Some(v) = version {
            args.extend(["--version".to_string(), v.to_string()]);
        }
        if all_versions {
            args.extend(["--devel".to_string(), "-l".to_string()]);
        }
        args.extend(["--output".to_string(), "json".to_string()]);

        Self::parse(&self.run(Invocation::new(args)).await?)
    }

    async fn list_deployed(&self, release: &str, namespace: &str) -> Result<Vec<InstalledRelease>> {
        let stdout = self
            .run(Invocation::new([
                "list",
                "--filter",
                release,
                "--deployed",
                "-o",
                "json",
                "--namespace",
                namespace,
            ]))
            .await?;
        Self::parse(&stdout)
    }

    async fn upgrade_install(&self, request: &InstallRequest) -> Result<()> {
        let mut args = vec!["upgrade".to_string(), "--install".to_string()];
        if request.values_stdin.is_some() {
            args.extend(["-f".to_string(), "-".to_string()]);
        }
        if let Some(file) = &request.values_file {
            args.extend(["-f".to_string(), file.display().to_string()]);
        }
        args.extend([request.release.clone(), request.chart.clone()]);
        if let Some(version) = &request.version {
            args.extend(["--version".to_string(), version.clone()]);
        }
        args.extend(["--namespace".to_string(), request.namespace.clone()]);

        self.run(Invocation::new(args).stdin(request.values_stdin.as_deref()))
            .await?;
        Ok(())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        self.run(Invocation::new([
            "uninstall",
            release,
            "--namespace",
            namespace,
        ]))
        .await?;
        Ok(())
    }

    async fn history(&self, release: &str, namespace: &str) -> Result<Vec<HelmRevision>> {
        match self
            .run(Invocation::new([
                "history",
                release,
                "-o",
                "json",
                "--namespace",
                namespace,
            ]))
            .await
        {
            Ok(stdout) => Self::parse(&stdout),
            Err(KubeError::Helm { stderr, .. }) if stderr.contains("not found") => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn rollback(&self, release: &str, revision: u32, namespace: &str) -> Result<()> {
        self.run(Invocation::new([
            "rollback".to_string(),
            release.to_string(),
            revision.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ]))
        .await?;
        Ok(())
    }

    async fn fetch(&self, chart: &str, version: &str, destination: &Path) -> Result<PathBuf> {
        self.run(Invocation::new([
            "fetch".to_string(),
            chart.to_string(),
            "--version".to_string(),
            version.to_string(),
            "--destination".to_string(),
            destination.display().to_string(),
        ]))
        .await?;
        Ok(destination.join(format!("{}-{}.tgz", chart_basename(chart), version)))
    }
}
