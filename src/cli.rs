use clap::{Parser, Subcommand};

/// Vecivendo Ads: paid-ad budget metering and marketplace KPIs
#[derive(Parser)]
#[command(name = "vecivendo-ads", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to VECIVENDO_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Inspect or change the credit cost of views and clicks
    Costs {
        #[command(subcommand)]
        command: CostCommands,
    },

    /// Show today's budget and spend for one paid ad
    Budget {
        #[arg(long)]
        ad_id: String,
    },

    /// Run the budget sweeper once and exit
    Sweep,
}

#[derive(Subcommand)]
pub enum CostCommands {
    /// Print the current view and click costs
    Show,
    /// Set one or both costs
    Set {
        #[arg(long)]
        view: Option<f64>,
        #[arg(long)]
        click: Option<f64>,
    },
}
