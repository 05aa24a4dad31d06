use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use gatehouse_core::{ApiClient, ApiError, Config, SessionManager};

pub const USAGE: &str = "\
Usage: gatehouse <command>

Commands:
  login [email]          Log in and store the session
  status                 Show the stored session without contacting the server
  profile                Fetch the user profile from the server
  refresh                Force a token refresh
  get <endpoint>         Authenticated GET, prints the JSON response
  otp send <email>       Request a one-time code
  otp verify <email> <code>
  logout                 Delete the stored session
  help                   Show this message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: Option<String> },
    Status,
    Profile,
    Refresh,
    Get { endpoint: String },
    OtpSend { email: String },
    OtpVerify { email: String, code: String },
    Logout,
    Help,
}

impl Command {
    pub fn parse(args: &[String]) -> Result<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match args.as_slice() {
            [] | ["help"] | ["--help"] | ["-h"] => Command::Help,
            ["login"] => Command::Login { email: None },
            ["login", email] => Command::Login {
                email: Some(email.to_string()),
            },
            ["status"] => Command::Status,
            ["profile"] => Command::Profile,
            ["refresh"] => Command::Refresh,
            ["get", endpoint] => Command::Get {
                endpoint: endpoint.to_string(),
            },
            ["otp", "send", email] => Command::OtpSend {
                email: email.to_string(),
            },
            ["otp", "verify", email, code] => Command::OtpVerify {
                email: email.to_string(),
                code: code.to_string(),
            },
            ["logout"] => Command::Logout,
            _ => bail!("Unrecognized arguments: {}", args.join(" ")),
        };
        Ok(command)
    }
}

pub async fn run(command: Command, session: &SessionManager, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { email } => login(session, config, email).await,
        Command::Status => {
            status(session);
            Ok(())
        }
        Command::Profile => {
            let profile = session.fetch_user_profile().await.map_err(explain)?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
        Command::Refresh => {
            session.refresh_access_token().await.map_err(explain)?;
            println!("Access token refreshed");
            status(session);
            Ok(())
        }
        Command::Get { endpoint } => {
            let api = ApiClient::new(session.clone());
            let response = api
                .get::<serde_json::Value>(&endpoint)
                .await
                .map_err(explain)?;
            match response.data {
                Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
                None => println!("HTTP {} (no JSON body)", response.status),
            }
            Ok(())
        }
        Command::OtpSend { email } => {
            session.auth_client().send_otp(&email).await?;
            println!("Code sent to {}", email);
            Ok(())
        }
        Command::OtpVerify { email, code } => {
            if session.auth_client().verify_otp(&email, &code).await? {
                println!("Code accepted");
                Ok(())
            } else {
                bail!("Code rejected")
            }
        }
        Command::Logout => {
            session.logout();
            println!("Logged out");
            Ok(())
        }
        Command::Help => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

async fn login(session: &SessionManager, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password(format!("Password for {}: ", email))
        .context("Failed to read password")?;

    let profile = session.login(&email, &password).await?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        tracing::warn!(error = %e, "Could not save config");
    }

    println!(
        "Logged in as {} ({})",
        profile.full_name.as_deref().unwrap_or(&profile.email),
        profile.role.map(|r| r.to_string()).unwrap_or_else(|| "no role".into())
    );
    println!("Next step: {:?}", profile.onboarding_step());
    Ok(())
}

fn status(session: &SessionManager) {
    let Some(tokens) = session.stored_tokens() else {
        println!("Not logged in");
        return;
    };

    let minutes = tokens.millis_until_expiry(session.now_millis()) / 60_000;
    if session.is_expired() {
        println!("Access token expired (refresh on next request)");
    } else {
        println!("Access token valid for {} more minutes", minutes.max(0));
    }

    match session.user_profile() {
        Some(profile) => {
            println!("User: {} <{}>", profile.full_name.as_deref().unwrap_or("-"), profile.email);
            if let Some(role) = profile.role {
                println!("Role: {}", role);
            }
            println!(
                "Assignment: building {} / block {} / apartment {}",
                profile.building_id.as_deref().unwrap_or("-"),
                profile.block_id.as_deref().unwrap_or("-"),
                profile.apartment_id.as_deref().unwrap_or("-"),
            );
            println!("Onboarding: {:?}", profile.onboarding_step());
        }
        None => println!("No cached profile"),
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        bail!("No value entered");
    }
    Ok(value)
}

/// Turn session expiry into an actionable message
fn explain(err: ApiError) -> anyhow::Error {
    if err.is_session_expired() {
        anyhow::anyhow!("Session expired - run `gatehouse login`")
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(&args("")).unwrap(), Command::Help);
        assert_eq!(Command::parse(&args("login")).unwrap(), Command::Login { email: None });
        assert_eq!(
            Command::parse(&args("login amina@example.com")).unwrap(),
            Command::Login {
                email: Some("amina@example.com".into())
            }
        );
        assert_eq!(
            Command::parse(&args("get /api/visitors")).unwrap(),
            Command::Get {
                endpoint: "/api/visitors".into()
            }
        );
        assert_eq!(
            Command::parse(&args("otp verify a@b.c 123456")).unwrap(),
            Command::OtpVerify {
                email: "a@b.c".into(),
                code: "123456".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(Command::parse(&args("delete everything")).is_err());
        assert!(Command::parse(&args("get")).is_err());
    }

    #[test]
    fn test_explain_session_expired() {
        let err = explain(ApiError::SessionExpired);
        assert!(err.to_string().contains("gatehouse login"));
        let err = explain(ApiError::Network("reset".into()));
        assert_eq!(err.to_string(), "Network error: reset");
    }
}
