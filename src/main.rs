use api_client::VenueClient;
use clap::{Parser, Subcommand, ValueEnum};
use configuration::load_config;
use core_types::{MarketKind, OrderSide};
use execution::{ExecutionHandler, GridParams, LadderRequest, TwapParams};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// The main entry point for the Meridian execution engine.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load API credentials from the .env file, if present.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config()?;
    let connector = Arc::new(VenueClient::new(cli.live, &config.api));
    let handler = ExecutionHandler::new(connector, &config.execution);

    match cli.command {
        Commands::Scaled(args) => handle_scaled(&handler, args).await?,
        Commands::Twap { command } => handle_twap(&handler, command).await?,
        Commands::Grid { command } => handle_grid(&handler, command).await?,
        Commands::Cancel { symbol, order_id } => {
            handler.cancel_order(&symbol, order_id).await?;
            println!("Cancelled order {order_id} on {symbol}");
        }
        Commands::OpenOrders => print_json(&handler.open_orders().await?)?,
        Commands::StopAll => {
            let (twaps, grids) = handler.stop_all().await;
            println!("Stopped {twaps} TWAP and {grids} grid campaigns");
        }
        Commands::Clean => {
            let (twaps, grids) = handler.clean_completed().await;
            println!("Removed {twaps} TWAP and {grids} grid campaigns");
        }
    }
    Ok(())
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// An order-execution engine for scaled, TWAP, and grid campaigns.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Trade against the production venue instead of the testnet.
    #[arg(long, global = true)]
    live: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Place a ladder of limit orders across a price band.
    Scaled(ScaledArgs),

    /// Manage TWAP campaigns.
    Twap {
        #[command(subcommand)]
        command: TwapCommands,
    },

    /// Manage grid campaigns.
    Grid {
        #[command(subcommand)]
        command: GridCommands,
    },

    /// Cancel one resting order by id.
    Cancel {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        order_id: u64,
    },

    /// List every open order on the account.
    OpenOrders,

    /// Stop every running campaign of both kinds.
    StopAll,

    /// Drop finished campaigns from the registries.
    Clean,
}

#[derive(Clone, Copy, ValueEnum)]
enum SideArg {
    Buy,
    Sell,
}

impl From<SideArg> for OrderSide {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Buy => OrderSide::Buy,
            SideArg::Sell => OrderSide::Sell,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum MarketArg {
    Spot,
    Perp,
}

impl From<MarketArg> for MarketKind {
    fn from(market: MarketArg) -> Self {
        match market {
            MarketArg::Spot => MarketKind::Spot,
            MarketArg::Perp => MarketKind::Perpetual,
        }
    }
}

#[derive(Parser)]
struct ScaledArgs {
    /// The symbol to trade (e.g. "ETHUSDT").
    #[arg(long)]
    symbol: String,

    #[arg(long, value_enum)]
    side: SideArg,

    /// Total size to spread across the ladder, in base units.
    #[arg(long)]
    total_size: Decimal,

    #[arg(long)]
    num_orders: usize,

    /// Band edges. Omit both to derive the band from the live book.
    #[arg(long)]
    start_price: Option<Decimal>,
    #[arg(long)]
    end_price: Option<Decimal>,

    /// Band width in percent of the touch price, for the market-aware mode.
    #[arg(long)]
    price_percent: Option<Decimal>,

    /// Size concentration exponent; 0 gives an equal split.
    #[arg(long, default_value_t = 0.0)]
    skew: f64,

    #[arg(long)]
    reduce_only: bool,

    /// Clamp the band against the live order book before placing.
    #[arg(long)]
    check_market: bool,

    /// Set this leverage on the symbol before placing.
    #[arg(long)]
    leverage: Option<u8>,
}

#[derive(Subcommand)]
enum TwapCommands {
    /// Register a new campaign without starting it.
    Create {
        #[arg(long)]
        symbol: String,
        #[arg(long, value_enum)]
        side: SideArg,
        #[arg(long)]
        total_quantity: Decimal,
        /// Total campaign duration in seconds.
        #[arg(long)]
        duration_secs: u64,
        #[arg(long)]
        num_slices: u32,
        /// Submit each slice as a resting limit order at this price instead
        /// of a market order.
        #[arg(long)]
        price_limit: Option<Decimal>,
        #[arg(long, value_enum, default_value = "spot")]
        market: MarketArg,
        #[arg(long, default_value_t = 1)]
        leverage: u8,
    },
    /// Start a created campaign.
    Start { id: String },
    /// Stop a running campaign.
    Stop { id: String },
    /// Show one campaign.
    Status { id: String },
    /// List all campaigns, active and completed.
    List,
}

#[derive(Subcommand)]
enum GridCommands {
    /// Register a new grid without starting it.
    Create {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        lower_price: Decimal,
        #[arg(long)]
        upper_price: Decimal,
        #[arg(long)]
        num_levels: usize,
        /// Capital the profit targets are measured against.
        #[arg(long)]
        total_investment: Decimal,
        #[arg(long, value_enum, default_value = "perp")]
        market: MarketArg,
        #[arg(long, default_value_t = 1)]
        leverage: u8,
        /// Close the grid once realized profit reaches this percent of the
        /// investment.
        #[arg(long)]
        take_profit_pct: Option<Decimal>,
        /// Close the grid once realized loss reaches this percent of the
        /// investment.
        #[arg(long)]
        stop_loss_pct: Option<Decimal>,
    },
    /// Place the initial orders and begin monitoring.
    Start { id: String },
    /// Cancel all resting orders and stop the grid.
    Stop { id: String },
    /// Show one grid.
    Status { id: String },
    /// List all grids, active and completed.
    List,
    /// Adjust the profit targets of a live grid.
    Modify {
        id: String,
        #[arg(long)]
        take_profit_pct: Option<Decimal>,
        #[arg(long)]
        stop_loss_pct: Option<Decimal>,
    },
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_scaled(handler: &ExecutionHandler, args: ScaledArgs) -> anyhow::Result<()> {
    let report = match (args.start_price, args.end_price) {
        (Some(start_price), Some(end_price)) => {
            let req = LadderRequest {
                symbol: args.symbol,
                side: args.side.into(),
                total_size: args.total_size,
                num_orders: args.num_orders,
                start_price,
                end_price,
                skew: args.skew,
                reduce_only: args.reduce_only,
                check_market: args.check_market,
            };
            match args.leverage {
                Some(leverage) => handler.place_ladder_leveraged(req, leverage).await?,
                None => handler.place_ladder(req).await?,
            }
        }
        (None, None) => match OrderSide::from(args.side) {
            OrderSide::Buy => {
                handler
                    .market_aware_buy(
                        &args.symbol,
                        args.total_size,
                        args.num_orders,
                        args.price_percent,
                        args.skew,
                    )
                    .await?
            }
            OrderSide::Sell => {
                handler
                    .market_aware_sell(
                        &args.symbol,
                        args.total_size,
                        args.num_orders,
                        args.price_percent,
                        args.skew,
                    )
                    .await?
            }
        },
        _ => anyhow::bail!("provide both --start-price and --end-price, or neither"),
    };
    println!(
        "Placed {}/{} orders",
        report.successful_orders, report.total_orders
    );
    print_json(&report)
}

async fn handle_twap(handler: &ExecutionHandler, command: TwapCommands) -> anyhow::Result<()> {
    match command {
        TwapCommands::Create {
            symbol,
            side,
            total_quantity,
            duration_secs,
            num_slices,
            price_limit,
            market,
            leverage,
        } => {
            let id = handler
                .create_twap(TwapParams {
                    symbol,
                    side: side.into(),
                    total_quantity,
                    duration: Duration::from_secs(duration_secs),
                    num_slices,
                    price_limit,
                    market: market.into(),
                    leverage,
                })
                .await?;
            println!("Created TWAP campaign {id}");
        }
        TwapCommands::Start { id } => {
            handler.start_twap(&id).await?;
            println!("Started TWAP campaign {id}");
        }
        TwapCommands::Stop { id } => print_json(&handler.stop_twap(&id).await?)?,
        TwapCommands::Status { id } => print_json(&handler.twap_status(&id).await?)?,
        TwapCommands::List => print_json(&handler.list_twaps().await)?,
    }
    Ok(())
}

async fn handle_grid(handler: &ExecutionHandler, command: GridCommands) -> anyhow::Result<()> {
    match command {
        GridCommands::Create {
            symbol,
            lower_price,
            upper_price,
            num_levels,
            total_investment,
            market,
            leverage,
            take_profit_pct,
            stop_loss_pct,
        } => {
            let id = handler
                .create_grid(GridParams {
                    symbol,
                    lower_price,
                    upper_price,
                    num_levels,
                    total_investment,
                    market: market.into(),
                    leverage,
                    take_profit_pct,
                    stop_loss_pct,
                })
                .await?;
            println!("Created grid campaign {id}");
        }
        GridCommands::Start { id } => print_json(&handler.start_grid(&id).await?)?,
        GridCommands::Stop { id } => print_json(&handler.stop_grid(&id).await?)?,
        GridCommands::Status { id } => print_json(&handler.grid_status(&id).await?)?,
        GridCommands::List => print_json(&handler.list_grids().await)?,
        GridCommands::Modify {
            id,
            take_profit_pct,
            stop_loss_pct,
        } => print_json(&handler.modify_grid(&id, take_profit_pct, stop_loss_pct).await?)?,
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_declaration_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn price_limit_help_describes_resting_limit_orders() {
        let cmd = Cli::command();
        let create = cmd
            .find_subcommand("twap")
            .unwrap()
            .find_subcommand("create")
            .unwrap();
        let help = create
            .get_arguments()
            .find(|a| a.get_id() == "price_limit")
            .and_then(|a| a.get_help())
            .unwrap()
            .to_string();
        assert!(help.contains("limit order"));
        assert!(!help.contains("skipped"));
    }
}
