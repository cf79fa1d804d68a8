//! Interactive install setup
//!
//! Collects the secrets an installation needs, writes a Helm values file and
//! stores the same values in the install config secret. Image pull and client
//! certificate secrets are referenced by name only and must be created
//! separately.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use serde_json::{Value, json};

use kxi_client::{defaults, sanitize_hostname};

use crate::cluster::{ClusterOps, NewSecret};
use crate::error::{KubeError, Result};
use crate::interact::Interaction;
use crate::orchestrator::VALUES_SECRET_KEY;

/// License file name that switches the platform to on-demand licensing
const ON_DEMAND_LICENSE: &str = "kc.lic";

const CLIENT_SECRET_LEN: usize = 10;

/// Keys an existing secret must carry to be usable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecretUse {
    License,
    Keycloak,
    Postgresql,
}

impl SecretUse {
    fn required_keys(self) -> &'static [&'static str] {
        match self {
            SecretUse::License => &["license"],
            SecretUse::Keycloak => &["admin-password", "management-password"],
            SecretUse::Postgresql => &["postgresql-postgres-password", "postgresql-password"],
        }
    }
}

/// Options for `install setup`
#[derive(Debug, Clone)]
pub struct SetupOptions {
    pub namespace: String,
    /// Prompted for when not given
    pub ingress_host: Option<String>,
    pub license_secret: String,
    pub image_repo: String,
    pub image_pull_secret: String,
    pub client_cert_secret: String,
    pub keycloak_secret: String,
    pub postgresql_secret: String,
    /// External Keycloak; when set no Keycloak secrets are created
    pub keycloak_auth_url: Option<String>,
    pub gui_client_secret: Option<String>,
    pub operator_client_secret: Option<String>,
    pub output_file: PathBuf,
    pub install_config_secret: String,
}

impl SetupOptions {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ingress_host: None,
            license_secret: defaults::LICENSE_SECRET.to_string(),
            image_repo: defaults::IMAGE_REPOSITORY.to_string(),
            image_pull_secret: defaults::IMAGE_PULL_SECRET.to_string(),
            client_cert_secret: defaults::CLIENT_CERT_SECRET.to_string(),
            keycloak_secret: defaults::KEYCLOAK_SECRET.to_string(),
            postgresql_secret: defaults::POSTGRESQL_SECRET.to_string(),
            keycloak_auth_url: None,
            gui_client_secret: None,
            operator_client_secret: None,
            output_file: PathBuf::from(defaults::VALUES_OUTPUT_FILE),
            install_config_secret: defaults::INSTALL_CONFIG_SECRET.to_string(),
        }
    }
}

/// What setup produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupResult {
    pub values_file: PathBuf,
    pub install_config_secret: String,
}

/// License choice made during setup
struct License {
    secret: String,
    on_demand: bool,
}

/// Runs the setup prompts against a cluster
pub struct Setup {
    cluster: Arc<dyn ClusterOps>,
    ui: Arc<dyn Interaction>,
}

impl Setup {
    pub fn new(cluster: Arc<dyn ClusterOps>, ui: Arc<dyn Interaction>) -> Self {
        Self { cluster, ui }
    }

    pub async fn run(&self, opts: &SetupOptions) -> Result<SetupResult> {
        self.ui.header("KX Insights Install Setup");
        self.cluster.ensure_namespace(&opts.namespace).await?;
        self.ui
            .info(&format!("Running in namespace {}", opts.namespace));

        let host = match &opts.ingress_host {
            Some(host) => sanitize_hostname(host),
            None => sanitize_hostname(
                &self
                    .ui
                    .prompt("Please enter the hostname for the installation", None)?,
            ),
        };

        self.ui.header("License details");
        let license = self.license(opts).await?;

        self.ui.header("Image repository");
        let image_repo = self.ui.prompt(
            "Please enter the image repository to pull images from",
            Some(&opts.image_repo),
        )?;
        self.expect_secret(&opts.namespace, &opts.image_pull_secret)
            .await?;
        self.expect_secret(&opts.namespace, &opts.client_cert_secret)
            .await?;

        self.ui.header("Keycloak");
        let (keycloak_secret, postgresql_secret) = match &opts.keycloak_auth_url {
            Some(_) => (opts.keycloak_secret.clone(), opts.postgresql_secret.clone()),
            None => self.keycloak(opts).await?,
        };

        let gui_client_secret = match &opts.gui_client_secret {
            Some(secret) => secret.clone(),
            None => self.client_secret("gui")?,
        };
        let operator_client_secret = match &opts.operator_client_secret {
            Some(secret) => secret.clone(),
            None => self.client_secret("operator")?,
        };

        let mut values = json!({
            "global": {
                "ingress": {"host": host},
                "license": {"secretName": license.secret},
                "caIssuer": {
                    "name": opts.client_cert_secret,
                    "secretName": opts.client_cert_secret,
                },
                "image": {"repository": image_repo},
                "imagePullSecrets": [{"name": opts.image_pull_secret}],
                "keycloak": {
                    "guiClientSecret": gui_client_secret,
                    "operatorClientSecret": operator_client_secret,
                },
            }
        });

        match &opts.keycloak_auth_url {
            None => {
                values["keycloak"] = json!({
                    "auth": {"existingSecret": keycloak_secret},
                    "postgresql": {
                        "auth": {"existingSecret": postgresql_secret},
                        "existingSecret": postgresql_secret,
                    },
                });
            }
            Some(url) => {
                values["global"]["keycloak"]["authURL"] = Value::String(self.auth_url(url));
                values["keycloak"] = json!({"enabled": false});
                values["keycloak-config-cli"] = json!({"enabled": true});
            }
        }

        if license.on_demand {
            values["global"]["license"]["onDemand"] = Value::Bool(true);
            values["kxi-acc-svc"] = json!({"enabled": false});
        }

        let yaml = serde_yaml::to_string(&values)?;
        let values_file = self.output_path(&opts.output_file)?;
        std::fs::write(&values_file, &yaml)?;
        tracing::debug!(path = %values_file.display(), "values file written");

        self.install_config(&opts.namespace, &opts.install_config_secret, &yaml)
            .await?;

        self.ui.header("KX Insights installation setup complete");
        self.ui.info(&format!(
            "Helm values file for installation saved in {}",
            values_file.display()
        ));

        Ok(SetupResult {
            values_file,
            install_config_secret: opts.install_config_secret.clone(),
        })
    }

    async fn license(&self, opts: &SetupOptions) -> Result<License> {
        if self
            .ui
            .confirm("Do you have an existing license secret", false)?
        {
            let secret = self
                .existing_secret(&opts.namespace, SecretUse::License)
                .await?;
            return Ok(License {
                secret,
                on_demand: false,
            });
        }

        let path = PathBuf::from(
            self.ui
                .prompt("Please enter the path to your kdb license", None)?,
        );
        let contents = std::fs::read(&path).map_err(|e| {
            KubeError::InvalidConfig(format!("Cannot read license {}: {}", path.display(), e))
        })?;
        let on_demand = path
            .file_name()
            .is_some_and(|name| name == ON_DEMAND_LICENSE);

        let secret = NewSecret::opaque(&opts.license_secret).with("license", contents);
        self.create_secret(&opts.namespace, &secret).await?;
        Ok(License {
            secret: opts.license_secret.clone(),
            on_demand,
        })
    }

    async fn keycloak(&self, opts: &SetupOptions) -> Result<(String, String)> {
        let keycloak = if self
            .ui
            .confirm("Do you have an existing keycloak secret", false)?
        {
            self.existing_secret(&opts.namespace, SecretUse::Keycloak)
                .await?
        } else {
            let admin = self
                .ui
                .prompt_secret("Please enter the Keycloak Admin password (input hidden)")?;
            let management = self.ui.prompt_secret(
                "Please enter the Keycloak WildFly Management password (input hidden)",
            )?;
            let secret = NewSecret::opaque(&opts.keycloak_secret)
                .with("admin-password", admin)
                .with("management-password", management);
            self.create_secret(&opts.namespace, &secret).await?;
            opts.keycloak_secret.clone()
        };

        let postgresql = if self
            .ui
            .confirm("Do you have an existing keycloak postgresql secret", false)?
        {
            self.existing_secret(&opts.namespace, SecretUse::Postgresql)
                .await?
        } else {
            let postgres = self
                .ui
                .prompt_secret("Please enter the Postgresql postgres password (input hidden)")?;
            let user = self
                .ui
                .prompt_secret("Please enter the Postgresql user password (input hidden)")?;
            let secret = NewSecret::opaque(&opts.postgresql_secret)
                .with("postgresql-postgres-password", postgres.clone())
                .with("postgres-password", postgres)
                .with("postgresql-password", user.clone())
                .with("password", user);
            self.create_secret(&opts.namespace, &secret).await?;
            opts.postgresql_secret.clone()
        };

        Ok((keycloak, postgresql))
    }

    /// Ask for an existing secret by name and check it has the keys `usage` needs
    async fn existing_secret(&self, namespace: &str, usage: SecretUse) -> Result<String> {
        let name = self
            .ui
            .prompt("Please enter the name of the existing secret", None)?;
        if !self.cluster.secret_exists(namespace, &name).await? {
            return Err(KubeError::InvalidConfig(format!(
                "Secret {} does not exist in the namespace {}",
                name, namespace
            )));
        }

        let mut missing = Vec::new();
        for key in usage.required_keys() {
            if self
                .cluster
                .read_secret_value(namespace, &name, key)
                .await?
                .is_none()
            {
                missing.push((*key).to_string());
            }
        }
        if !missing.is_empty() {
            return Err(KubeError::InvalidConfig(format!(
                "Secret {} is missing required data keys [{}]",
                name,
                missing.join(", ")
            )));
        }
        Ok(name)
    }

    async fn expect_secret(&self, namespace: &str, name: &str) -> Result<()> {
        if !self.cluster.secret_exists(namespace, name).await? {
            self.ui.warn(&format!(
                "Secret {} does not exist in the namespace {}, create it before installing",
                name, namespace
            ));
        }
        Ok(())
    }

    async fn create_secret(&self, namespace: &str, secret: &NewSecret) -> Result<()> {
        self.cluster.apply_secret(namespace, secret).await?;
        self.ui
            .info(&format!("Secret {} successfully created", secret.name));
        Ok(())
    }

    fn client_secret(&self, client: &str) -> Result<String> {
        let explicit = self.ui.confirm(
            &format!(
                "Do you want to set a secret for the {} service account explicitly",
                client
            ),
            false,
        )?;
        if explicit {
            return self
                .ui
                .prompt_secret("Please enter the secret (input hidden)");
        }

        self.ui.info(&format!(
            "Randomly generating client secret for {} and setting in values file, record this value for reuse during upgrade",
            client
        ));
        Ok(random_secret())
    }

    fn auth_url(&self, raw: &str) -> String {
        let mut url = raw.trim().to_string();
        if let Some(rest) = url.strip_prefix("https://") {
            self.ui
                .info("Replacing https:// with http:// in --keycloak-auth-url");
            url = format!("http://{}", rest);
        }
        if !url.starts_with("http://") {
            url = format!("http://{}", url);
        }
        if !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    fn output_path(&self, requested: &Path) -> Result<PathBuf> {
        if requested.exists()
            && !self.ui.confirm(
                &format!(
                    "{} file exists. Do you want to overwrite it with a new values file?",
                    requested.display()
                ),
                false,
            )?
        {
            return Ok(PathBuf::from(self.ui.prompt(
                "Please enter the path to write the values file for the install",
                None,
            )?));
        }
        Ok(requested.to_path_buf())
    }

    async fn install_config(&self, namespace: &str, name: &str, yaml: &str) -> Result<()> {
        if self.cluster.secret_exists(namespace, name).await?
            && !self.ui.confirm(
                &format!(
                    "Values file secret {} already exists. Do you want to overwrite it?",
                    name
                ),
                false,
            )?
        {
            return Ok(());
        }
        let secret = NewSecret::opaque(name).with(VALUES_SECRET_KEY, yaml);
        self.create_secret(namespace, &secret).await
    }
}

fn random_secret() -> String {
    rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(CLIENT_SECRET_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterCall, MockCluster};
    use crate::interact::{Line, ScriptedInteraction};

    const NS: &str = "kxi";

    fn setup(cluster: &MockCluster, ui: &ScriptedInteraction) -> Setup {
        Setup::new(Arc::new(cluster.clone()), Arc::new(ui.clone()))
    }

    fn options(dir: &Path) -> SetupOptions {
        SetupOptions {
            output_file: dir.join("values.yaml"),
            ..SetupOptions::new(NS)
        }
    }

    fn written(path: &Path) -> Value {
        serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_setup_creates_secrets_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let license = dir.path().join("kc.lic");
        std::fs::write(&license, "LICENSE").unwrap();

        let cluster = MockCluster::new();
        let ui = ScriptedInteraction::new()
            // license, keycloak, postgresql, gui explicit, operator random
            .with_confirms([false, false, false, true, false])
            .with_answers([
                "https://insights.example.com/",
                license.to_str().unwrap(),
                "",
                "admin-pw",
                "mgmt-pw",
                "pg-pw",
                "user-pw",
                "gui-secret",
            ]);

        let result = setup(&cluster, &ui).run(&options(dir.path())).await.unwrap();

        assert_eq!(result.values_file, dir.path().join("values.yaml"));
        assert_eq!(result.install_config_secret, defaults::INSTALL_CONFIG_SECRET);

        let values = written(&result.values_file);
        assert_eq!(values["global"]["ingress"]["host"], "insights.example.com");
        assert_eq!(values["global"]["license"]["secretName"], "kxi-license");
        assert_eq!(values["global"]["license"]["onDemand"], true);
        assert_eq!(values["kxi-acc-svc"]["enabled"], false);
        assert_eq!(values["global"]["image"]["repository"], "registry.dl.kx.com");
        assert_eq!(values["global"]["keycloak"]["guiClientSecret"], "gui-secret");
        let operator = values["global"]["keycloak"]["operatorClientSecret"]
            .as_str()
            .unwrap();
        assert_eq!(operator.len(), CLIENT_SECRET_LEN);
        assert!(operator.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_eq!(values["keycloak"]["auth"]["existingSecret"], "kxi-keycloak");

        let keycloak = cluster.secret(NS, "kxi-keycloak").unwrap();
        assert_eq!(keycloak["admin-password"], "admin-pw");
        assert_eq!(keycloak["management-password"], "mgmt-pw");
        let postgresql = cluster.secret(NS, "kxi-postgresql").unwrap();
        assert_eq!(postgresql["postgres-password"], "pg-pw");
        assert_eq!(postgresql["password"], "user-pw");
        assert_eq!(cluster.secret(NS, "kxi-license").unwrap()["license"], "LICENSE");

        let stored = cluster.secret(NS, defaults::INSTALL_CONFIG_SECRET).unwrap();
        assert_eq!(
            stored[VALUES_SECRET_KEY],
            std::fs::read_to_string(&result.values_file).unwrap()
        );
        assert!(ui.printed("Secret kxi-nexus-pull-secret does not exist"));
    }

    #[tokio::test]
    async fn test_setup_never_echoes_passwords() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MockCluster::new().with_secret(NS, "lic", &[("license", "x")]);
        let ui = ScriptedInteraction::new()
            .with_confirms([true, false, false, true, true])
            .with_answers([
                "insights.example.com",
                "lic",
                "",
                "admin-pw",
                "mgmt-pw",
                "pg-pw",
                "user-pw",
                "gui-secret",
                "operator-secret",
            ]);

        setup(&cluster, &ui).run(&options(dir.path())).await.unwrap();

        for line in ui.lines() {
            let text = format!("{:?}", line);
            for secret in ["admin-pw", "mgmt-pw", "pg-pw", "user-pw", "gui-secret"] {
                assert!(!text.contains(secret), "{} shown in {}", secret, text);
            }
        }
    }

    #[tokio::test]
    async fn test_existing_secret_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MockCluster::new().with_secret(NS, "lic", &[("other", "x")]);
        let ui = ScriptedInteraction::new()
            .with_confirms([true])
            .with_answers(["insights.example.com", "lic"]);

        let err = setup(&cluster, &ui)
            .run(&options(dir.path()))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Secret lic is missing required data keys [license]");
        assert!(!dir.path().join("values.yaml").exists());
    }

    #[tokio::test]
    async fn test_external_keycloak() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MockCluster::new().with_secret(NS, "lic", &[("license", "x")]);
        let ui = ScriptedInteraction::new()
            .with_confirms([true])
            .with_answers(["insights.example.com", "lic", ""]);
        let opts = SetupOptions {
            keycloak_auth_url: Some("https://keycloak.example.com".into()),
            gui_client_secret: Some("g".into()),
            operator_client_secret: Some("o".into()),
            ..options(dir.path())
        };

        let result = setup(&cluster, &ui).run(&opts).await.unwrap();

        let values = written(&result.values_file);
        assert_eq!(
            values["global"]["keycloak"]["authURL"],
            "http://keycloak.example.com/"
        );
        assert_eq!(values["keycloak"]["enabled"], false);
        assert_eq!(values["keycloak-config-cli"]["enabled"], true);
        assert!(cluster.secret(NS, "kxi-keycloak").is_none());
        assert!(ui.printed("Replacing https:// with http://"));
    }

    #[tokio::test]
    async fn test_existing_install_config_kept_when_declined() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = MockCluster::new()
            .with_secret(NS, "lic", &[("license", "x")])
            .with_secret(NS, defaults::INSTALL_CONFIG_SECRET, &[(VALUES_SECRET_KEY, "old")]);
        let ui = ScriptedInteraction::new()
            .with_confirms([true, false])
            .with_answers(["insights.example.com", "lic", ""]);
        let opts = SetupOptions {
            keycloak_auth_url: Some("keycloak.example.com".into()),
            gui_client_secret: Some("g".into()),
            operator_client_secret: Some("o".into()),
            ..options(dir.path())
        };

        setup(&cluster, &ui).run(&opts).await.unwrap();

        assert_eq!(
            cluster.secret(NS, defaults::INSTALL_CONFIG_SECRET).unwrap()[VALUES_SECRET_KEY],
            "old"
        );
        assert!(
            !cluster
                .calls()
                .iter()
                .any(|c| matches!(c, ClusterCall::ApplySecret { .. }))
        );
        assert!(ui.lines().contains(&Line::Confirm {
            prompt: "Values file secret kxi-install-config already exists. Do you want to overwrite it?"
                .to_string(),
            answer: false,
        }));
    }
}
