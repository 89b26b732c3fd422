use std::net::IpAddr;

use dtail_config::Config;

/// Regular users authenticate by public key at the transport layer; the
/// server's only remaining job is to recognize the username (spec §4.6
/// step 1: "accept regular user via public key").
#[must_use]
pub fn accepts_public_key_user(config: &Config, user: &str) -> bool {
    config.permissions_for(user).is_some()
}

/// Special non-interactive users (HealthUser, ScheduleUser, ContinuousUser)
/// authenticate with a configured password and an IP allow-list (spec §4.6
/// step 1).
#[must_use]
pub fn accepts_special_user(
    config: &Config,
    user: &str,
    password: &str,
    peer_ip: Option<IpAddr>,
) -> bool {
    let Some(special) = config.special_users.get(user) else {
        return false;
    };
    if special.password != password {
        return false;
    }
    if special.allowed_ips.is_empty() {
        return true;
    }
    peer_ip.is_some_and(|ip| special.allowed_ips.iter().any(|allowed| allowed == &ip.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtail_config::{SpecialUser, UserPermissions};

    #[test]
    fn public_key_user_needs_configured_permissions() {
        let mut config = Config::default();
        config.permissions.insert(
            "alice".to_string(),
            UserPermissions {
                path_regexes: vec![".*".to_string()],
            },
        );
        assert!(accepts_public_key_user(&config, "alice"));
        assert!(!accepts_public_key_user(&config, "mallory"));
    }

    #[test]
    fn special_user_checks_password_and_ip_allow_list() {
        let mut config = Config::default();
        config.special_users.insert(
            "HealthUser".to_string(),
            SpecialUser {
                password: "secret".to_string(),
                allowed_ips: vec!["10.0.0.1".to_string()],
            },
        );
        let good_ip: IpAddr = "10.0.0.1".parse().unwrap();
        let bad_ip: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(accepts_special_user(&config, "HealthUser", "secret", Some(good_ip)));
        assert!(!accepts_special_user(&config, "HealthUser", "secret", Some(bad_ip)));
        assert!(!accepts_special_user(&config, "HealthUser", "wrong", Some(good_ip)));
    }

    #[test]
    fn special_user_with_no_allow_list_accepts_any_ip() {
        let mut config = Config::default();
        config.special_users.insert(
            "ScheduleUser".to_string(),
            SpecialUser {
                password: "secret".to_string(),
                allowed_ips: vec![],
            },
        );
        assert!(accepts_special_user(&config, "ScheduleUser", "secret", None));
    }
}
