#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tourbot::config::Config;
use tourbot::gateway::run_gateway;
use tourbot::store::{NewAgency, NewTour, NewVisaKnowledge, SqliteStore, TravelStyle};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "tourbot", about = "Travel concierge chatbot service", version)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve {
        /// Override the configured bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Populate the database with demo agencies, tours, and visa entries.
    Seed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }
            run_gateway(config).await
        }
        Command::Seed => seed(&config).await,
    }
}

async fn seed(config: &Config) -> Result<()> {
    let store = SqliteStore::connect(&config.database.url).await?;

    let sunny = store
        .insert_agency(&NewAgency {
            username: "sunny-travel".into(),
            company_name: "Sunny Travel".into(),
            tagline: "Mediterranean getaways since 2009".into(),
            is_featured: true,
            featured_priority: 1,
            is_active: true,
            ..NewAgency::default()
        })
        .await?;
    let nomad = store
        .insert_agency(&NewAgency {
            username: "nomad-routes".into(),
            company_name: "Nomad Routes".into(),
            tagline: "Adventure and trekking specialists".into(),
            is_featured: false,
            featured_priority: 0,
            is_active: true,
            ..NewAgency::default()
        })
        .await?;

    let today = Utc::now().date_naive();
    let tours = [
        (sunny, "Bosphorus week", "Istanbul", 21, 7, 950.0, TravelStyle::Cultural),
        (sunny, "Desert nights", "Dubai", 14, 5, 1200.0, TravelStyle::Luxury),
        (nomad, "Caucasus trek", "Tbilisi", 30, 9, 780.0, TravelStyle::Adventure),
        (nomad, "Cappadocia balloons", "Cappadocia", 10, 4, 640.0, TravelStyle::Romantic),
    ];
    for (agency_id, title, destination, offset, nights, price, style) in tours {
        store
            .insert_tour(&NewTour {
                agency_id: Some(agency_id),
                title: title.into(),
                description: format!("{nights}-night {destination} package"),
                destination: destination.into(),
                start_date: today + Duration::days(offset),
                end_date: today + Duration::days(offset + nights),
                price,
                is_active: true,
                is_featured: false,
                is_discounted: false,
                discount_percent: None,
                travel_style: style,
            })
            .await?;
    }

    let visas = [
        ("France", "schengen", "Short-stay Schengen visa for up to 90 days", "15 working days"),
        ("UAE", "tourist", "30-day tourist visa, extendable once", "4 working days"),
        ("Turkey", "e-visa", "Online e-visa for most nationalities", "instant"),
    ];
    for (country, visa_type, summary, processing_time) in visas {
        store
            .insert_visa_knowledge(&NewVisaKnowledge {
                country: country.into(),
                visa_type: visa_type.into(),
                summary: summary.into(),
                processing_time: processing_time.into(),
                is_active: true,
                ..NewVisaKnowledge::default()
            })
            .await?;
    }

    println!("Seeded 2 agencies, {} tours, {} visa entries.", 4, 3);
    Ok(())
}
