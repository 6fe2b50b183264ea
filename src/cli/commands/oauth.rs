use clap::{Arg, Command};

pub const ARG_OAUTH_STATE_TTL: &str = "oauth-state-ttl-seconds";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_CLIENT_SECRET: &str = "google-client-secret";
pub const ARG_MICROSOFT_CLIENT_ID: &str = "microsoft-client-id";
pub const ARG_MICROSOFT_CERT: &str = "microsoft-cert";
pub const ARG_MICROSOFT_KEY: &str = "microsoft-key";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OAUTH_STATE_TTL)
                .long(ARG_OAUTH_STATE_TTL)
                .help("Seconds an OAuth authorization state stays valid")
                .default_value("180")
                .env("SALESGATE_OAUTH_STATE_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id")
                .env("SALESGATE_GOOGLE_CLIENT_ID")
                .requires(ARG_GOOGLE_CLIENT_SECRET),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_SECRET)
                .long(ARG_GOOGLE_CLIENT_SECRET)
                .help("Google OAuth client secret")
                .env("SALESGATE_GOOGLE_CLIENT_SECRET")
                .hide_env_values(true)
                .requires(ARG_GOOGLE_CLIENT_ID),
        )
        .arg(
            Arg::new(ARG_MICROSOFT_CLIENT_ID)
                .long(ARG_MICROSOFT_CLIENT_ID)
                .help("Microsoft OAuth client id")
                .env("SALESGATE_MICROSOFT_CLIENT_ID")
                .requires_all([ARG_MICROSOFT_CERT, ARG_MICROSOFT_KEY]),
        )
        .arg(
            Arg::new(ARG_MICROSOFT_CERT)
                .long(ARG_MICROSOFT_CERT)
                .help("Path to the PEM certificate registered with Microsoft")
                .env("SALESGATE_MICROSOFT_CERT")
                .requires(ARG_MICROSOFT_CLIENT_ID),
        )
        .arg(
            Arg::new(ARG_MICROSOFT_KEY)
                .long(ARG_MICROSOFT_KEY)
                .help("Path to the PEM private key that signs client assertions")
                .env("SALESGATE_MICROSOFT_KEY")
                .requires(ARG_MICROSOFT_CLIENT_ID),
        )
}
