use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use gym_keeper::clock::SystemClock;
use gym_keeper::lifecycle::fingerprint::FingerprintId;
use gym_keeper::lifecycle::renewal::RenewalRequest;
use gym_keeper::models::attendance::MemberIdentity;
use gym_keeper::models::members::{MemberUpdate, MembershipType, NewMember};
use gym_keeper::models::payments::PaymentMethod;
use gym_keeper::repositories::PgStore;
use gym_keeper::services::attendance::AttendanceRequest;
use gym_keeper::services::couples::CoupleRequest;
use gym_keeper::services::fingerprints::FingerprintRequest;
use gym_keeper::services::members::MemberRequest;
use gym_keeper::services::{self, request, ServiceChannels, ServiceContext};
use gym_keeper::settings::Settings;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bulk status synchronizer.
    Sync,
    Count,
    List,
    Show {
        id: Uuid,
    },
    /// Register a member from a JSON form.
    Register {
        #[arg(long)]
        file: String,
    },
    /// Apply a JSON partial update.
    Update {
        id: Uuid,
        #[arg(long)]
        file: String,
    },
    Suspend {
        id: Uuid,
    },
    Reactivate {
        id: Uuid,
    },
    Delete {
        id: Uuid,
    },
    Renew {
        id: Uuid,
        #[arg(long)]
        months: u32,
        #[arg(long)]
        amount_in_cents: i64,
        #[arg(long)]
        plan: Option<MembershipType>,
        #[arg(long, default_value = "Cash")]
        method: PaymentMethod,
    },
    /// Reserve a fingerprint id and print its enrollment token.
    Enroll {
        #[arg(long)]
        candidate: Option<String>,
        #[arg(long)]
        device_key: Option<String>,
    },
    Backfill,
    Pool,
    Link {
        member: Uuid,
        partner: Uuid,
    },
    Unlink {
        member: Uuid,
        #[arg(long)]
        plan: MembershipType,
    },
    Candidates {
        member: Uuid,
        #[arg(long)]
        search: Option<String>,
    },
    Group {
        member: Uuid,
    },
    CheckIn {
        #[arg(long, conflicts_with = "fingerprint", required_unless_present = "fingerprint")]
        member: Option<Uuid>,
        #[arg(long)]
        fingerprint: Option<FingerprintId>,
    },
    Today,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let settings = Settings::load(&args.config)?;

    init_logging(&args.log4rs)?;
    log::info!("Starting gym keeper.");

    let conn = PgPoolOptions::new()
        .max_connections(settings.postgres.max_connections)
        .connect(&settings.postgres.url)
        .await?;
    sqlx::migrate!("./migrations").run(&conn).await?;

    let context = ServiceContext::from_settings(
        Arc::new(PgStore::new(conn)),
        Arc::new(SystemClock),
        &settings,
    )?;

    println!("[*] Starting services.");
    let channels = services::start_services(context);

    if let Err(e) = dispatch(&channels, args.command).await {
        log::error!("{}", e);
        return Err(e);
    }
    Ok(())
}

async fn dispatch(channels: &ServiceChannels, command: Command) -> Result<()> {
    match command {
        Command::Sync => {
            let changed = request(&channels.members, |response| MemberRequest::SyncStatuses {
                response,
            })
            .await?;
            print_json(&serde_json::json!({ "changed": changed }))
        }
        Command::Count => {
            let count = request(&channels.members, |response| MemberRequest::Count { response })
                .await?;
            print_json(&serde_json::json!({ "count": count }))
        }
        Command::List => {
            let members =
                request(&channels.members, |response| MemberRequest::List { response }).await?;
            print_json(&members)
        }
        Command::Show { id } => {
            let details =
                request(&channels.members, |response| MemberRequest::Get { id, response }).await?;
            print_json(&details)
        }
        Command::Register { file } => {
            let new_member: NewMember = serde_json::from_str(&fs::read_to_string(file)?)?;
            let member = request(&channels.members, |response| MemberRequest::Register {
                new_member,
                response,
            })
            .await?;
            print_json(&member)
        }
        Command::Update { id, file } => {
            let update: MemberUpdate = serde_json::from_str(&fs::read_to_string(file)?)?;
            let member = request(&channels.members, |response| MemberRequest::Update {
                id,
                update,
                response,
            })
            .await?;
            print_json(&member)
        }
        Command::Suspend { id } => {
            let member =
                request(&channels.members, |response| MemberRequest::Suspend { id, response })
                    .await?;
            print_json(&member)
        }
        Command::Reactivate { id } => {
            let member = request(&channels.members, |response| MemberRequest::Reactivate {
                id,
                response,
            })
            .await?;
            print_json(&member)
        }
        Command::Delete { id } => {
            let member =
                request(&channels.members, |response| MemberRequest::Delete { id, response })
                    .await?;
            print_json(&member)
        }
        Command::Renew {
            id,
            months,
            amount_in_cents,
            plan,
            method,
        } => {
            let renewal = RenewalRequest {
                months,
                amount_in_cents,
                membership_type: plan,
                payment_method: method,
            };
            let outcome = request(&channels.members, |response| MemberRequest::Renew {
                id,
                request: renewal,
                response,
            })
            .await?;
            print_json(&outcome)
        }
        Command::Enroll {
            candidate,
            device_key,
        } => {
            let proof = request(&channels.fingerprints, |response| FingerprintRequest::Enroll {
                candidate,
                device_key,
                response,
            })
            .await?;
            print_json(&proof)
        }
        Command::Backfill => {
            let report = request(&channels.fingerprints, |response| {
                FingerprintRequest::Backfill { response }
            })
            .await?;
            print_json(&report)
        }
        Command::Pool => {
            let status = request(&channels.fingerprints, |response| {
                FingerprintRequest::PoolStatus { response }
            })
            .await?;
            print_json(&status)
        }
        Command::Link { member, partner } => {
            let group = request(&channels.couples, |response| CoupleRequest::Link {
                member_id: member,
                partner_id: partner,
                response,
            })
            .await?;
            print_json(&group)
        }
        Command::Unlink { member, plan } => {
            let outcome = request(&channels.couples, |response| CoupleRequest::Unlink {
                member_id: member,
                target: plan,
                response,
            })
            .await?;
            print_json(&outcome)
        }
        Command::Candidates { member, search } => {
            let candidates = request(&channels.couples, |response| CoupleRequest::Candidates {
                member_id: member,
                search,
                response,
            })
            .await?;
            print_json(&candidates)
        }
        Command::Group { member } => {
            let details = request(&channels.couples, |response| CoupleRequest::Group {
                member_id: member,
                response,
            })
            .await?;
            print_json(&details)
        }
        Command::CheckIn {
            member,
            fingerprint,
        } => {
            let identity = match (member, fingerprint) {
                (Some(id), _) => MemberIdentity::Member(id),
                (None, Some(fingerprint_id)) => MemberIdentity::Fingerprint(fingerprint_id),
                (None, None) => anyhow::bail!("Either --member or --fingerprint is required"),
            };
            let outcome = request(&channels.attendance, |response| AttendanceRequest::CheckIn {
                identity,
                response,
            })
            .await?;
            print_json(&outcome)
        }
        Command::Today => {
            let today =
                request(&channels.attendance, |response| AttendanceRequest::Today { response })
                    .await?;
            print_json(&today)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
