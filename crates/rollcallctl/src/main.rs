//! rollcallctl - Command-line client for rollcalld
//!
//! Sends one command per invocation and prints the response as JSON.
//! Commands that act for a person take `--user` and `--role`; the request
//! layer is trusted to have authenticated them.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_api::{
    Attachment, AttendanceStatus, Caller, CheckInPayload, Command, PermissionStatus,
    ResponseResult, Role,
};
use rollcall_ipc::IpcClient;
use rollcall_util::{default_socket_path, PermissionId, SubjectId, UserId, VenueId};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// rollcallctl - Talk to the rollcall service
#[derive(Parser, Debug)]
#[command(name = "rollcallctl", version)]
#[command(about = "Command-line client for rollcalld", long_about = None)]
struct Cli {
    /// Socket path (or set ROLLCALL_SOCKET env var)
    #[arg(short, long, global = true, env = "ROLLCALL_SOCKET")]
    socket: Option<PathBuf>,

    /// User the command acts for
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Role of that user
    #[arg(short, long, global = true, value_enum)]
    role: Option<RoleArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Student,
    Teacher,
    Admin,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Student => Role::Student,
            RoleArg::Teacher => Role::Teacher,
            RoleArg::Admin => Role::Admin,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatusArg {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReviewStateArg {
    Pending,
    Approved,
    Rejected,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check the service is reachable
    Ping,

    /// Show service health
    Health,

    /// Show a summary of the service state
    State,

    /// Submit a scanned QR code (JSON payload) as a check-in
    CheckIn {
        /// QR payload, e.g. '{"subject_code":"CS101","date":"2025-03-14","time":"09:00:00"}'
        payload: String,
    },

    /// Get the data for a class QR code
    Token {
        subject: String,

        #[arg(long)]
        venue: Option<String>,
    },

    /// Record an attendance status by hand
    Register {
        student: String,
        subject: String,

        /// Date (YYYY-MM-DD)
        date: NaiveDate,

        #[arg(value_enum)]
        status: StatusArg,
    },

    /// Look up one attendance record
    Attendance {
        student: String,
        subject: String,

        /// Date (YYYY-MM-DD)
        date: NaiveDate,
    },

    /// List venues with their booking state
    Venues,

    /// Show one venue
    Venue { venue: String },

    /// Add a venue (admin)
    AddVenue {
        venue: String,
        name: String,
        capacity: u32,
    },

    /// Book a venue
    Book {
        venue: String,

        /// Booking length in minutes (default from config)
        #[arg(short, long)]
        minutes: Option<u64>,
    },

    /// Release a venue you hold
    Release { venue: String },

    /// Free every lapsed booking now (operator)
    Sweep,

    /// Ask to be excused from a subject
    Submit {
        subject: String,
        reason: String,

        /// File to attach
        #[arg(long)]
        attachment: Option<PathBuf>,

        /// MIME type of the attachment
        #[arg(long, default_value = "application/octet-stream")]
        content_type: String,
    },

    /// Approve or reject a permission request
    Review {
        permission: String,

        /// Reject instead of approve
        #[arg(long)]
        reject: bool,
    },

    /// List permission requests
    Permissions {
        #[arg(long, value_enum)]
        status: Option<ReviewStateArg>,
    },

    /// Reload the daemon configuration (operator)
    Reload,

    /// Show recent audit log entries (operator)
    Audit {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Print events as they happen
    Watch,
}

impl Cli {
    fn caller(&self) -> Result<Option<Caller>> {
        match (&self.user, self.role) {
            (Some(user), Some(role)) => Ok(Some(Caller::new(UserId::new(user.as_str()), role.into()))),
            (None, None) => Ok(None),
            _ => bail!("--user and --role must be given together"),
        }
    }
}

fn build_command(command: Commands) -> Result<Command> {
    let command = match command {
        Commands::Ping => Command::Ping,
        Commands::Health => Command::GetHealth,
        Commands::State => Command::GetState,

        Commands::CheckIn { payload } => {
            let payload: CheckInPayload =
                serde_json::from_str(&payload).context("QR payload is not valid JSON")?;
            Command::CheckIn { payload }
        }

        Commands::Token { subject, venue } => Command::IssueCheckInToken {
            subject_code: SubjectId::new(subject),
            venue_id: venue.map(VenueId::new),
        },

        Commands::Register {
            student,
            subject,
            date,
            status,
        } => Command::RegisterAttendance {
            student_id: UserId::new(student),
            subject_id: SubjectId::new(subject),
            date,
            status: match status {
                StatusArg::Present => AttendanceStatus::Present,
                StatusArg::Absent => AttendanceStatus::Absent,
            },
        },

        Commands::Attendance {
            student,
            subject,
            date,
        } => Command::GetAttendance {
            student_id: UserId::new(student),
            subject_id: SubjectId::new(subject),
            date,
        },

        Commands::Venues => Command::ListVenues,
        Commands::Venue { venue } => Command::GetVenue {
            venue_id: VenueId::new(venue),
        },

        Commands::AddVenue {
            venue,
            name,
            capacity,
        } => Command::AddVenue {
            venue_id: VenueId::new(venue),
            name,
            capacity,
        },

        Commands::Book { venue, minutes } => Command::BookVenue {
            venue_id: VenueId::new(venue),
            duration_minutes: minutes,
        },

        Commands::Release { venue } => Command::ReleaseVenue {
            venue_id: VenueId::new(venue),
        },

        Commands::Sweep => Command::SweepExpired,

        Commands::Submit {
            subject,
            reason,
            attachment,
            content_type,
        } => {
            let attachment = match attachment {
                Some(path) => Some(Attachment {
                    content_type,
                    data: std::fs::read(&path)
                        .with_context(|| format!("Failed to read attachment {:?}", path))?,
                }),
                None => None,
            };
            Command::SubmitPermission {
                subject_id: SubjectId::new(subject),
                reason,
                attachment,
            }
        }

        Commands::Review { permission, reject } => Command::ReviewPermission {
            permission_id: PermissionId::parse(&permission)
                .with_context(|| format!("Not a permission id: {}", permission))?,
            approve: !reject,
        },

        Commands::Permissions { status } => Command::ListPermissions {
            status: status.map(|s| match s {
                ReviewStateArg::Pending => PermissionStatus::Pending,
                ReviewStateArg::Approved => PermissionStatus::Approved,
                ReviewStateArg::Rejected => PermissionStatus::Rejected,
            }),
        },

        Commands::Reload => Command::ReloadConfig,
        Commands::Audit { limit } => Command::GetAuditLog { limit },

        Commands::Watch => Command::SubscribeEvents,
    };

    Ok(command)
}

async fn watch(client: IpcClient) -> Result<()> {
    let mut events = client.subscribe().await.context("Failed to subscribe")?;

    loop {
        let event = events.next().await.context("Event stream ended")?;
        println!("{}", serde_json::to_string(&event)?);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let socket = cli.socket.clone().unwrap_or_else(default_socket_path);
    let caller = cli.caller()?;

    debug!(socket = %socket.display(), "Connecting to rollcalld");
    let mut client = IpcClient::connect(&socket)
        .await
        .with_context(|| format!("Failed to connect to rollcalld at {:?}", socket))?;

    if matches!(cli.command, Commands::Watch) {
        return watch(client).await;
    }

    let command = build_command(cli.command)?;
    let response = client.send_as(caller, command).await?;

    match response.result {
        ResponseResult::Ok(payload) => {
            println!("{}", serde_json::to_string_pretty(&payload)?);
            Ok(())
        }
        ResponseResult::Err(e) => {
            bail!("{:?}: {}", e.code, e.message)
        }
    }
}
