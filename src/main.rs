use alloy_primitives::{Address, U256};
use clap::{Args, Parser, Subcommand};
use eyre::{eyre, Result, WrapErr};

use approval_scanner::{
    allowance::{ensure_allowance, fee_amount, AllowanceAction, FeeUnit},
    config::Config,
    contract,
    metadata::MetadataCache,
    parse_address,
    units::{format_units, parse_units},
    ConfirmedApprovals, FileStore, HttpClient, RevokeTarget, Revoker, ScanCache, ScanDirection,
    ScanReport, Scanner,
};

#[derive(Parser)]
#[command(
    name = "approval-scanner",
    about = "Find live ERC-20 / ERC-721 / ERC-1155 approvals for an account and revoke them."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Connection options shared by every command.
#[derive(Args)]
struct Target {
    /// Account to inspect (falls back to `account` in the config file)
    #[arg(long)]
    account: Option<String>,

    /// EVM JSON-RPC URL (falls back to `rpc_url` in the config file)
    #[arg(long)]
    rpc_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the latest window of approval history and merge it into the cache
    Scan {
        #[command(flatten)]
        target: Target,

        /// Extend the cached range backwards instead of scanning up to head
        #[arg(long, default_value_t = false)]
        previous: bool,

        /// Days covered by this scan (overrides config)
        #[arg(long)]
        days: Option<u32>,

        /// Output format: summary or json
        #[arg(long, default_value = "summary")]
        format: String,
    },

    /// Print the cached approvals without scanning
    Show {
        #[command(flatten)]
        target: Target,

        /// Output format: summary or json
        #[arg(long, default_value = "summary")]
        format: String,
    },

    /// Delete the cached scan for the account on the connected chain
    ClearCache {
        #[command(flatten)]
        target: Target,
    },

    /// Revoke an ERC-20 allowance: approve(spender, 0)
    RevokeErc20 {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        token: String,

        #[arg(long)]
        spender: String,
    },

    /// Revoke a single-token ERC-721 approval: approve(0x0, tokenId)
    RevokeNft {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        contract: String,

        #[arg(long)]
        token_id: String,
    },

    /// Revoke an operator: setApprovalForAll(operator, false)
    RevokeOperator {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        contract: String,

        #[arg(long)]
        operator: String,
    },

    /// Make sure a spender may pull at least `amount` (plus fee) of a token
    EnsureAllowance {
        #[command(flatten)]
        target: Target,

        #[arg(long)]
        token: String,

        #[arg(long)]
        spender: String,

        /// Human-readable amount, scaled by the token's decimals
        #[arg(long)]
        amount: String,

        /// Token decimals (read from the contract when omitted)
        #[arg(long)]
        decimals: Option<u8>,

        /// Raw fee value added on top of the amount
        #[arg(long, default_value_t = 0)]
        fee: u64,

        /// Fee unit: percent, bps or auto (>100 means basis points)
        #[arg(long, default_value = "auto")]
        fee_unit: FeeUnit,
    },
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

struct Context {
    config: Config,
    client: HttpClient,
    account: Address,
}

impl Context {
    fn open(target: Target) -> Result<Self> {
        let config = Config::load();

        let rpc_url = target
            .rpc_url
            .or_else(|| config.rpc_url.clone())
            .ok_or_else(|| eyre!("no RPC URL: pass --rpc-url or set rpc_url in the config file"))?;
        let account = target
            .account
            .or_else(|| config.account.clone())
            .ok_or_else(|| eyre!("no account: pass --account or set account in the config file"))?;
        let account = parse_address(&account)?;

        let client = HttpClient::new(&rpc_url).with_receipt_poll(config.receipt_poll());
        Ok(Self {
            config,
            client,
            account,
        })
    }

    fn store(&self) -> FileStore {
        FileStore::new(self.config.cache_dir())
    }

    fn scanner(self, days: Option<u32>) -> (Scanner<HttpClient, FileStore>, Address) {
        let mut settings = self.config.scan_settings();
        if let Some(days) = days {
            settings.days_per_scan = days;
        }
        let metadata = MetadataCache::new(
            self.config.metadata_cache_ttl(),
            self.config.metadata_cache_max_entries(),
        );
        let store = self.store();
        let scanner = Scanner::new(self.client, store, settings).with_metadata_cache(metadata);
        (scanner, self.account)
    }

    fn revoker(self) -> (Revoker<HttpClient, FileStore>, Address) {
        let store = self.store();
        (Revoker::new(self.client, store), self.account)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_approvals(approvals: &ConfirmedApprovals) {
    println!("ERC-20 allowances ({}):", approvals.erc20.len());
    for a in &approvals.erc20 {
        println!(
            "  {:<10} {}  spender {}  allowance {}",
            a.symbol,
            a.token,
            a.spender,
            a.allowance.text()
        );
    }
    println!("ERC-721 token approvals ({}):", approvals.erc721_tokens.len());
    for a in &approvals.erc721_tokens {
        println!(
            "  {:<10} {} #{}  approved {}",
            a.symbol, a.contract, a.token_id, a.approved
        );
    }
    println!("Operators ({}):", approvals.operators.len());
    for a in &approvals.operators {
        println!(
            "  {:<10} {}  operator {}",
            a.standard.as_str(),
            a.contract,
            a.operator
        );
    }
}

fn print_cache(cache: &ScanCache) {
    let approvals = cache.approvals();
    println!("Scanned blocks: {}", cache.scanned_range());
    println!("Head at scan:   {}", cache.latest_head_at_scan);
    if let Some(at) = chrono::DateTime::from_timestamp_millis(cache.last_scan_at) {
        println!("Last scan:      {}", at.to_rfc3339());
    }
    println!(
        "Approvals:      {} ({} unlimited)",
        approvals.len(),
        approvals.unlimited_count()
    );
    println!();
    print_approvals(&approvals);
}

fn print_report(report: &ScanReport) {
    println!("Approval Scan");
    println!("=============");
    println!("Account:        {}", report.account);
    println!("Chain:          {}", report.chain_id);
    println!("Range:          {} ({} blocks)", report.range, report.range.len());
    println!("Block time:     {:.2}s", report.block_time);
    println!("Candidates:     {}", report.candidates);
    println!("Confirmed:      {}", report.confirmed.len());
    if !report.skipped.is_empty() {
        println!("Skipped windows ({}):", report.skipped.len());
        for s in &report.skipped {
            println!("  {} ({})", s.range, s.reason.as_str());
        }
    }
    if !report.persisted {
        println!("Warning:        scan cache could not be written");
    }
    println!();
    print_cache(&report.cache);
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_scan(target: Target, previous: bool, days: Option<u32>, format: String) -> Result<i32> {
    let rt = tokio::runtime::Runtime::new()?;
    let (scanner, account) = Context::open(target)?.scanner(days);
    let direction = if previous {
        ScanDirection::Previous
    } else {
        ScanDirection::Latest
    };

    eprintln!("Scanning approvals for {}...", account);
    let progress = |pct: u8, label: &str| eprintln!("[{pct:>3}%] {label}");

    let result = rt.block_on(async {
        let scan = scanner.scan(account, direction, &progress);
        tokio::pin!(scan);
        tokio::select! {
            res = &mut scan => res,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Cancelling scan...");
                scanner.cancel();
                scan.await
            }
        }
    });

    let report = match result {
        Ok(report) => report,
        Err(e) if e.is_aborted() => {
            eprintln!("Scan cancelled.");
            return Ok(130);
        }
        Err(e) => return Err(e).wrap_err("scan failed"),
    };

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&report),
    }
    Ok(0)
}

fn cmd_show(target: Target, format: String) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let (scanner, account) = Context::open(target)?.scanner(None);

    let Some(cache) = rt.block_on(scanner.cached(account))? else {
        eprintln!("No cached scan for {}. Run `approval-scanner scan` first.", account);
        return Ok(());
    };

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&cache)?),
        _ => print_cache(&cache),
    }
    Ok(())
}

fn cmd_clear_cache(target: Target) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let (scanner, account) = Context::open(target)?.scanner(None);
    rt.block_on(scanner.clear_cache(account))?;
    eprintln!("Cache cleared for {}", account);
    Ok(())
}

fn cmd_revoke(target: Target, revoke: RevokeTarget) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let (revoker, account) = Context::open(target)?.revoker();

    eprintln!("Revoking {}...", revoke.row_key());
    match rt.block_on(revoker.revoke(account, revoke)) {
        Ok(tx_hash) => {
            println!("Revoked. Transaction: {}", tx_hash);
            Ok(())
        }
        Err(e) => Err(eyre!("revoke failed: {}", e.reason())),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_ensure_allowance(
    target: Target,
    token: String,
    spender: String,
    amount: String,
    decimals: Option<u8>,
    fee: u64,
    fee_unit: FeeUnit,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let ctx = Context::open(target)?;
    let token = parse_address(&token)?;
    let spender = parse_address(&spender)?;

    rt.block_on(async {
        let decimals = match decimals {
            Some(d) => d,
            None => contract::decimals(&ctx.client, token)
                .await
                .wrap_err("could not read token decimals; pass --decimals")?,
        };
        let amount: U256 = parse_units(&amount, decimals)?;
        let required = amount + fee_amount(amount, fee, fee_unit);
        eprintln!(
            "Ensuring allowance of {} for {}...",
            format_units(required, decimals),
            spender
        );

        let action = ensure_allowance(&ctx.client, ctx.account, token, spender, required)
            .await
            .map_err(|e| eyre!("approve failed: {}", e.reason()))?;
        match action {
            AllowanceAction::AlreadySufficient { current } => {
                println!("Allowance already sufficient ({})", format_units(current, decimals));
            }
            AllowanceAction::Approved { tx_hash } => {
                println!("Approved. Transaction: {}", tx_hash);
            }
            AllowanceAction::ResetThenApproved { reset_tx, tx_hash } => {
                println!("Reset allowance to zero: {}", reset_tx);
                println!("Approved. Transaction: {}", tx_hash);
            }
        }
        Ok::<(), eyre::Report>(())
    })
}

fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("approval_scanner=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Scan {
            target,
            previous,
            days,
            format,
        } => match cmd_scan(target, previous, days, format) {
            Ok(code) => {
                if code != 0 {
                    std::process::exit(code);
                }
                Ok(())
            }
            Err(e) => Err(e),
        },
        Commands::Show { target, format } => cmd_show(target, format),
        Commands::ClearCache { target } => cmd_clear_cache(target),
        Commands::RevokeErc20 {
            target,
            token,
            spender,
        } => parse_address(&token).and_then(|token| {
            let spender = parse_address(&spender)?;
            cmd_revoke(target, RevokeTarget::Erc20 { token, spender })
        }),
        Commands::RevokeNft {
            target,
            contract,
            token_id,
        } => parse_address(&contract).and_then(|contract| {
            let token_id = token_id
                .parse::<U256>()
                .wrap_err_with(|| format!("invalid token id: {token_id}"))?;
            cmd_revoke(target, RevokeTarget::Erc721 { contract, token_id })
        }),
        Commands::RevokeOperator {
            target,
            contract,
            operator,
        } => parse_address(&contract).and_then(|contract| {
            let operator = parse_address(&operator)?;
            cmd_revoke(target, RevokeTarget::Operator { contract, operator })
        }),
        Commands::EnsureAllowance {
            target,
            token,
            spender,
            amount,
            decimals,
            fee,
            fee_unit,
        } => cmd_ensure_allowance(target, token, spender, amount, decimals, fee, fee_unit),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:?}");
        std::process::exit(1);
    }
}
