use {
    anyhow::Result,
    clap::Subcommand,
    parley_config::OtpConfig,
    parley_otp::OtpEngine,
    qrcode::{QrCode, render::unicode::Dense1x2},
    secrecy::SecretString,
};

#[derive(Subcommand)]
pub enum OtpAction {
    /// Print the current one-time code for a secret.
    Code {
        /// Base32 shared secret.
        #[arg(long, env = "PARLEY_OTP_SECRET")]
        secret: String,
    },
    /// Print the enrollment URI for a client, optionally as a QR code.
    Enroll {
        /// Base32 shared secret.
        #[arg(long, env = "PARLEY_OTP_SECRET")]
        secret: String,
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        alias: String,
        /// Render the URI as a terminal QR code.
        #[arg(long, default_value_t = false)]
        qr: bool,
    },
}

pub fn handle_otp(action: OtpAction, config: &OtpConfig) -> Result<()> {
    let engine = OtpEngine::new(config);
    match action {
        OtpAction::Code { secret } => code(&engine, config.step_secs, secret),
        OtpAction::Enroll {
            secret,
            client_id,
            alias,
            qr,
        } => enroll(&engine, secret, &client_id, &alias, qr),
    }
}

fn code(engine: &OtpEngine, step_secs: u64, secret: String) -> Result<()> {
    let secret = SecretString::new(secret);
    let now = parley_otp::unix_now();
    let code = engine.code_at(&secret, now)?;
    let step = step_secs.max(1);
    let remaining = step - now % step;
    println!("{code}  (valid for {remaining}s)");
    Ok(())
}

fn enroll(engine: &OtpEngine, secret: String, client_id: &str, alias: &str, qr: bool) -> Result<()> {
    let secret = SecretString::new(secret);
    let uri = engine.provisioning_uri(&secret, client_id, alias)?;
    if qr {
        let image = QrCode::new(uri.as_bytes())?
            .render::<Dense1x2>()
            .quiet_zone(true)
            .build();
        println!("{image}");
    }
    println!("{uri}");
    Ok(())
}
