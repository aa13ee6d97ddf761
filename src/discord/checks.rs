use poise::serenity_prelude::RoleId;

use super::bot::Context;
use crate::error::AppError;

/// Passes for users listed in `PERMISSION_LEVEL_DEV`.
pub async fn dev(ctx: Context<'_>) -> Result<bool, AppError> {
    if ctx.data().config.is_dev(ctx.author().id.get()) {
        Ok(true)
    } else {
        Err(AppError::PermissionDenied(
            "You must be a `dev` to execute this command!".into(),
        ))
    }
}

/// Passes for devs, for users or roles granted the command in the `permissions`
/// table, and for manager roles inside trusted guilds.
pub async fn staff(ctx: Context<'_>) -> Result<bool, AppError> {
    let config = &ctx.data().config;
    let user_id = ctx.author().id.get();
    if config.is_dev(user_id) {
        return Ok(true);
    }

    let role_ids: Vec<RoleId> = match ctx.author_member().await {
        Some(member) => member.roles.clone(),
        None => Vec::new(),
    };
    let raw_ids: Vec<u64> = role_ids.iter().map(|id| id.get()).collect();

    let granted = ctx
        .data()
        .db
        .has_command_permission(&ctx.command().qualified_name, user_id, &raw_ids)
        .await?;
    if granted {
        return Ok(true);
    }

    if let Some(guild_id) = ctx.guild_id() {
        if config.is_trusted_guild(guild_id.get())
            && has_manager_role(&role_names(ctx, &role_ids), &config.manager_role_names)
        {
            return Ok(true);
        }
    }

    Err(AppError::PermissionDenied(
        "You must be a `staff` to execute this command!".into(),
    ))
}

fn role_names(ctx: Context<'_>, role_ids: &[RoleId]) -> Vec<String> {
    let Some(guild) = ctx.guild() else {
        return Vec::new();
    };
    role_ids
        .iter()
        .filter_map(|id| guild.roles.get(id))
        .map(|role| role.name.clone())
        .collect()
}

fn has_manager_role(role_names: &[String], manager_roles: &[String]) -> bool {
    role_names.iter().any(|name| manager_roles.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn manager_role_must_match_exactly() {
        let managers = names(&["Staff", "Admin"]);
        assert!(has_manager_role(&names(&["Member", "Staff"]), &managers));
        assert!(!has_manager_role(&names(&["staff"]), &managers));
        assert!(!has_manager_role(&[], &managers));
        assert!(!has_manager_role(&names(&["Staff"]), &[]));
    }
}
