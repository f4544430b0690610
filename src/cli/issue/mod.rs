//! Issue command - creates or rotates a key pair

use clap::Args;

use crate::cli::bootstrap;
use crate::domain::api_key::Environment;
use crate::infrastructure::api_key::{CreatePairRequest, PairOutcome};

#[derive(Debug, Args)]
pub struct IssueArgs {
    /// Owning user id
    #[arg(long)]
    pub user: String,

    /// Owning company id
    #[arg(long)]
    pub company: String,

    #[arg(long, default_value = "test")]
    pub environment: Environment,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// Per-minute rate limit for the pair
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Allowed client IP (repeatable)
    #[arg(long = "ip")]
    pub ips: Vec<String>,
}

impl IssueArgs {
    fn to_request(&self) -> CreatePairRequest {
        let mut request = CreatePairRequest::new(self.environment)
            .with_ip_whitelist(self.ips.iter().cloned().collect())
            .with_created_by("cli");

        if let Some(name) = &self.name {
            request = request.with_name(name.clone());
        }
        if let Some(description) = &self.description {
            request = request.with_description(description.clone());
        }
        if let Some(limit) = self.rate_limit {
            request = request.with_rate_limit_per_minute(limit);
        }

        request
    }
}

pub async fn run(args: IssueArgs) -> anyhow::Result<()> {
    let context = bootstrap().await?;

    let issued = context
        .credentials
        .create_or_rotate_pair(&args.user, &args.company, args.to_request())
        .await?;

    let verb = match issued.outcome {
        PairOutcome::Created => "Created",
        PairOutcome::Rotated => "Rotated",
    };

    println!("{} {} key pair for {}", verb, args.environment, args.user);
    println!("Public key:  {}", issued.public_token);
    println!("Private key: {}", issued.private_token);
    println!("Store the private key now; it cannot be shown again.");

    Ok(())
}
