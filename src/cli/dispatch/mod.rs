use crate::cli::{
    actions::{server::Args, Action},
    commands::{self, oauth, smtp},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::path::PathBuf;

fn string(matches: &clap::ArgMatches, id: &str) -> Option<String> {
    matches
        .get_one::<String>(id)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let public_base_url = string(matches, commands::ARG_PUBLIC_BASE_URL)
        .context("missing required argument: --public-base-url")?;

    let codec = match (
        matches.get_one::<u64>(commands::ARG_CODEC_MULTIPLIER),
        matches.get_one::<u64>(commands::ARG_CODEC_MASK),
    ) {
        (Some(multiplier), Some(mask)) => Some((*multiplier, *mask)),
        _ => None,
    };

    let google = string(matches, oauth::ARG_GOOGLE_CLIENT_ID).zip(
        string(matches, oauth::ARG_GOOGLE_CLIENT_SECRET).map(SecretString::from),
    );

    let microsoft = match (
        string(matches, oauth::ARG_MICROSOFT_CLIENT_ID),
        string(matches, oauth::ARG_MICROSOFT_CERT),
        string(matches, oauth::ARG_MICROSOFT_KEY),
    ) {
        (Some(client_id), Some(cert), Some(key)) => {
            Some((client_id, PathBuf::from(cert), PathBuf::from(key)))
        }
        _ => None,
    };

    Ok(Action::Server(Args {
        port: matches
            .get_one::<u16>(commands::ARG_PORT)
            .copied()
            .unwrap_or(8080),
        dsn: string(matches, commands::ARG_DSN),
        public_base_url,
        allowed_origins: matches
            .get_many::<String>(commands::ARG_ALLOWED_ORIGINS)
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        app_name: string(matches, commands::ARG_APP_NAME),
        session_minutes: matches
            .get_one::<i64>(commands::ARG_SESSION_MINUTES)
            .copied()
            .unwrap_or(30),
        verification_minutes: matches
            .get_one::<i64>(commands::ARG_VERIFICATION_MINUTES)
            .copied()
            .unwrap_or(30),
        oauth_state_ttl_seconds: matches
            .get_one::<i64>(oauth::ARG_OAUTH_STATE_TTL)
            .copied()
            .unwrap_or(180),
        response_timeout_seconds: matches
            .get_one::<u64>(commands::ARG_RESPONSE_TIMEOUT)
            .copied()
            .unwrap_or(10),
        expose_error_details: matches.get_flag(commands::ARG_EXPOSE_ERROR_DETAILS),
        codec,
        google,
        microsoft,
        smtp_host: string(matches, smtp::ARG_SMTP_HOST),
        smtp_port: matches
            .get_one::<u16>(smtp::ARG_SMTP_PORT)
            .copied()
            .unwrap_or(465),
        smtp_username: string(matches, smtp::ARG_SMTP_USERNAME),
        smtp_password: string(matches, smtp::ARG_SMTP_PASSWORD).map(SecretString::from),
        smtp_from: string(matches, smtp::ARG_SMTP_FROM),
        mail_queue_capacity: matches
            .get_one::<usize>(smtp::ARG_MAIL_QUEUE_CAPACITY)
            .copied()
            .unwrap_or(1024),
        signup_verify_url: string(matches, commands::ARG_SIGNUP_VERIFY_URL),
        password_reset_url: string(matches, commands::ARG_PASSWORD_RESET_URL),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_builds_server_args() {
        temp_env::with_vars_unset(
            [
                "SALESGATE_DSN",
                "SALESGATE_GOOGLE_CLIENT_ID",
                "SALESGATE_GOOGLE_CLIENT_SECRET",
                "SALESGATE_SMTP_HOST",
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "salesgate",
                    "--public-base-url",
                    "https://app.example.com",
                    "--codec-multiplier",
                    "7",
                    "--codec-mask",
                    "99",
                ]);
                let Action::Server(args) = handler(&matches).unwrap();
                assert_eq!(args.public_base_url, "https://app.example.com");
                assert!(args.dsn.is_none());
                assert_eq!(args.codec, Some((7, 99)));
                assert!(args.google.is_none());
                assert!(args.microsoft.is_none());
                assert!(args.smtp_host.is_none());
            },
        );
    }

    #[test]
    fn test_handler_collects_microsoft_paths() {
        temp_env::with_vars_unset(["SALESGATE_DSN"], || {
            let matches = commands::new().get_matches_from(vec![
                "salesgate",
                "--public-base-url",
                "https://app.example.com",
                "--microsoft-client-id",
                "ms-id",
                "--microsoft-cert",
                "/etc/salesgate/ms.crt",
                "--microsoft-key",
                "/etc/salesgate/ms.key",
            ]);
            let Action::Server(args) = handler(&matches).unwrap();
            let (client_id, cert, key) = args.microsoft.unwrap();
            assert_eq!(client_id, "ms-id");
            assert_eq!(cert, PathBuf::from("/etc/salesgate/ms.crt"));
            assert_eq!(key, PathBuf::from("/etc/salesgate/ms.key"));
        });
    }
}
