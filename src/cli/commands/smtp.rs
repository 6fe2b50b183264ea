use clap::{Arg, Command};

pub const ARG_SMTP_HOST: &str = "smtp-host";
pub const ARG_SMTP_PORT: &str = "smtp-port";
pub const ARG_SMTP_USERNAME: &str = "smtp-username";
pub const ARG_SMTP_PASSWORD: &str = "smtp-password";
pub const ARG_SMTP_FROM: &str = "smtp-from";
pub const ARG_MAIL_QUEUE_CAPACITY: &str = "mail-queue-capacity";

/// Without `--smtp-host` messages are only logged.
#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SMTP_HOST)
                .long(ARG_SMTP_HOST)
                .help("SMTP relay host")
                .env("SALESGATE_SMTP_HOST")
                .requires(ARG_SMTP_FROM),
        )
        .arg(
            Arg::new(ARG_SMTP_PORT)
                .long(ARG_SMTP_PORT)
                .help("SMTP relay port")
                .default_value("465")
                .env("SALESGATE_SMTP_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SMTP_USERNAME)
                .long(ARG_SMTP_USERNAME)
                .help("SMTP username")
                .env("SALESGATE_SMTP_USERNAME")
                .requires(ARG_SMTP_PASSWORD),
        )
        .arg(
            Arg::new(ARG_SMTP_PASSWORD)
                .long(ARG_SMTP_PASSWORD)
                .help("SMTP password")
                .env("SALESGATE_SMTP_PASSWORD")
                .hide_env_values(true)
                .requires(ARG_SMTP_USERNAME),
        )
        .arg(
            Arg::new(ARG_SMTP_FROM)
                .long(ARG_SMTP_FROM)
                .help("Sender address, example: Salesgate <noreply@example.com>")
                .env("SALESGATE_SMTP_FROM"),
        )
        .arg(
            Arg::new(ARG_MAIL_QUEUE_CAPACITY)
                .long(ARG_MAIL_QUEUE_CAPACITY)
                .help("Messages held in the mail queue before new ones are dropped")
                .default_value("1024")
                .env("SALESGATE_MAIL_QUEUE_CAPACITY")
                .value_parser(clap::value_parser!(usize)),
        )
}
