//! Entitlement commands

use clap::{Args, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use kxi_client::{EntitlementClient, EntitlementUpdate, EntityType, NewEntitlement, parse_groups};
use kxi_kube::Interaction;

use super::{AuthArgs, Context};
use crate::error::Result;
use crate::terminal::TermInteraction;

#[derive(Subcommand, Debug)]
pub enum EntitlementCommand {
    /// List entitlements
    List(AuthOnly),

    /// List the groups that can be entitled
    Actors(AuthOnly),

    /// Show one entitlement
    Get(IdArgs),

    /// Create an entitlement
    Create(CreateArgs),

    /// Change the name, owner or groups of an entitlement
    Update(UpdateArgs),

    /// Delete an entitlement
    Delete(DeleteArgs),

    /// Grant groups access to an entity
    AddGroups(GroupArgs),

    /// Revoke group access to an entity
    RmGroups(GroupArgs),
}

#[derive(Args, Debug)]
pub struct AuthOnly {
    #[command(flatten)]
    pub auth: AuthArgs,
}

#[derive(Args, Debug)]
pub struct IdArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Entitlement id
    pub id: Uuid,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Entitlement id
    pub id: Uuid,

    /// Name of the entitled entity
    pub name: String,

    /// Entity type
    #[arg(value_name = "TYPE")]
    pub entity_type: EntityType,

    /// Owner user id
    #[arg(long)]
    pub owner: Option<Uuid>,

    /// Comma separated group ids
    #[arg(long, default_value = "")]
    pub groups: String,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Entitlement id
    pub id: Uuid,

    /// New entity name
    #[arg(long)]
    pub name: Option<String>,

    /// New owner user id
    #[arg(long)]
    pub owner: Option<Uuid>,

    /// Replacement comma separated group ids
    #[arg(long)]
    pub groups: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Entitlement id
    pub id: Uuid,

    /// Do not ask for confirmation
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct GroupArgs {
    #[command(flatten)]
    pub auth: AuthArgs,

    /// Entitlement id
    pub id: Uuid,

    /// Comma separated group ids
    pub groups: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn client(ctx: &Context, auth: &AuthArgs) -> Result<EntitlementClient> {
    let (base, token) = auth.connect(ctx).await?;
    Ok(EntitlementClient::new(&base, token)?)
}

fn update_body(args: &UpdateArgs) -> Result<EntitlementUpdate> {
    Ok(EntitlementUpdate {
        name: args.name.clone(),
        owner: args.owner,
        groups: args.groups.as_deref().map(parse_groups).transpose()?,
    })
}

pub async fn run(ctx: &Context, command: EntitlementCommand) -> Result<()> {
    match command {
        EntitlementCommand::List(args) => print_json(&client(ctx, &args.auth).await?.list().await?),
        EntitlementCommand::Actors(args) => {
            print_json(&client(ctx, &args.auth).await?.actors().await?)
        }
        EntitlementCommand::Get(args) => {
            print_json(&client(ctx, &args.auth).await?.get(args.id).await?)
        }
        EntitlementCommand::Create(args) => {
            let body = NewEntitlement {
                id: args.id,
                entity: args.name.clone(),
                entity_type: args.entity_type,
                owner: args.owner,
                groups: parse_groups(&args.groups)?,
            };
            print_json(&client(ctx, &args.auth).await?.create(&body).await?)
        }
        EntitlementCommand::Update(args) => {
            let body = update_body(&args)?;
            if body.is_empty() {
                tracing::debug!(id = %args.id, "nothing to update");
            }
            print_json(&client(ctx, &args.auth).await?.update(args.id, &body).await?)
        }
        EntitlementCommand::Delete(args) => {
            let ui = TermInteraction::new();
            if !args.force
                && !ui.confirm("Are you sure you want to delete this entitlement?", false)?
            {
                return Ok(());
            }
            let deleted = client(ctx, &args.auth).await?.delete(args.id).await?;
            match deleted {
                Some(body) => print_json(&body),
                None => {
                    ui.info(&format!("Deleted entitlement {}", args.id));
                    Ok(())
                }
            }
        }
        EntitlementCommand::AddGroups(args) => {
            let groups = parse_groups(&args.groups)?;
            print_json(
                &client(ctx, &args.auth)
                    .await?
                    .add_groups(args.id, &groups)
                    .await?,
            )
        }
        EntitlementCommand::RmGroups(args) => {
            let groups = parse_groups(&args.groups)?;
            print_json(
                &client(ctx, &args.auth)
                    .await?
                    .rm_groups(args.id, &groups)
                    .await?,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "6f1a8b5e-1d2c-4a3b-9c8d-7e6f5a4b3c2d";

    fn update_args(groups: Option<&str>) -> UpdateArgs {
        UpdateArgs {
            auth: AuthArgs::default(),
            id: Uuid::parse_str(ID).unwrap(),
            name: Some("basic".into()),
            owner: None,
            groups: groups.map(String::from),
        }
    }

    #[test]
    fn test_update_body_only_given_fields() {
        let body = update_body(&update_args(None)).unwrap();
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"entity": "basic"})
        );
    }

    #[test]
    fn test_update_body_rejects_bad_group() {
        let err = update_body(&update_args(Some("not-a-uuid"))).unwrap_err();
        assert_eq!(err.to_string(), "not-a-uuid is not a valid UUID");
    }
}
