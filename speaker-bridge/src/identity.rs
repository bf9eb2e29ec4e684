//! Who the accessory belongs to

use anyhow::{Context, Result};

/// Display name of the current OS user, or the login name when no display
/// name is set
pub fn current_user_name() -> Result<String> {
    let realname = whoami::fallible::realname().ok();
    let username = whoami::fallible::username().ok();

    pick_user_name(realname, username).context("Could not determine the current user")
}

/// Default accessory name for `user`
pub fn accessory_name(user: &str) -> String {
    format!("{user}'s macbook speaker volume")
}

fn pick_user_name(realname: Option<String>, username: Option<String>) -> Option<String> {
    [realname, username]
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_display_name() {
        let name = pick_user_name(Some("Ada Lovelace".into()), Some("ada".into()));
        assert_eq!(name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_falls_back_to_login_name() {
        assert_eq!(
            pick_user_name(Some("  ".into()), Some("ada".into())).as_deref(),
            Some("ada")
        );
        assert_eq!(pick_user_name(None, Some("ada".into())).as_deref(), Some("ada"));
    }

    #[test]
    fn test_no_user() {
        assert_eq!(pick_user_name(None, Some(String::new())), None);
        assert_eq!(pick_user_name(None, None), None);
    }

    #[test]
    fn test_accessory_name() {
        assert_eq!(accessory_name("Ada"), "Ada's macbook speaker volume");
    }
}
