use anyhow::{anyhow, Result};

const SYSTEMCTL_VERBS: [&str; 4] = ["is-active", "start", "stop", "restart"];

pub(super) fn validate_systemctl_args(service_prefix: &str, args: &[&str]) -> Result<()> {
    if args.len() == 2
        && SYSTEMCTL_VERBS.contains(&args[0])
        && args[1].starts_with(service_prefix)
        && args[1].len() > service_prefix.len()
        && is_unit_name(args[1])
    {
        return Ok(());
    }

    Err(anyhow!("systemctl arguments are not allowed: {args:?}"))
}

pub(super) fn validate_odoo_args(args: &[&str]) -> Result<()> {
    if args.len() == 5
        && args[0] == "-c"
        && args[1].ends_with(".conf")
        && !args[1].contains("..")
        && args[2] == "-u"
        && is_module_list(args[3])
        && args[4] == "--stop-after-init"
    {
        return Ok(());
    }

    Err(anyhow!("odoo-bin arguments are not allowed: {args:?}"))
}

fn is_unit_name(value: &str) -> bool {
    value
        .chars()
        .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.' | '@'))
}

fn is_module_list(value: &str) -> bool {
    !value.is_empty()
        && value.split(',').all(|module| {
            !module.is_empty()
                && module
                    .chars()
                    .all(|character| character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systemctl_accepts_prefixed_services() {
        assert!(validate_systemctl_args("odoo19e-", &["is-active", "odoo19e-dev-acme"]).is_ok());
        assert!(validate_systemctl_args("odoo19e-", &["stop", "odoo19e-acme"]).is_ok());
        assert!(validate_systemctl_args("odoo19e-", &["start", "odoo19e-acme"]).is_ok());
    }

    #[test]
    fn systemctl_rejects_bare_prefix_and_shell_characters() {
        assert!(validate_systemctl_args("odoo19e-", &["stop", "odoo19e-"]).is_err());
        assert!(validate_systemctl_args("odoo19e-", &["stop", "odoo19e-a;reboot"]).is_err());
        assert!(validate_systemctl_args("odoo19e-", &["stop"]).is_err());
    }

    #[test]
    fn odoo_args_require_update_once_shape() {
        assert!(validate_odoo_args(&["-c", "/x/odoo.conf", "-u", "sale,stock", "--stop-after-init"]).is_ok());
        assert!(validate_odoo_args(&["-c", "/x/odoo.conf", "-u", "all", "--stop-after-init"]).is_ok());
        assert!(validate_odoo_args(&["-c", "/x/odoo.conf", "-u", "sale;rm", "--stop-after-init"]).is_err());
        assert!(validate_odoo_args(&["-c", "/x/odoo.conf", "-u", "sale,,stock", "--stop-after-init"]).is_err());
        assert!(validate_odoo_args(&["-c", "/x/odoo.conf", "-u", "sale"]).is_err());
    }
}
