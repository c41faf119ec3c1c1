use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wxoa::accounts::{Account, AccountStore, FileAccountStore};
use wxoa::wechat::{signature, DraftRequest, WeChatClient};

#[derive(Parser)]
#[command(name = "wxoa")]
#[command(about = "Official-account tool: bind accounts, publish drafts, run the webhook gateway", long_about = None)]
struct Cli {
    /// Config file path (default: WXOA_CONFIG_PATH or ~/.wxoa/config.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config and an empty account store.
    Init,

    /// Verify an account's app id and secret against the platform, then save it.
    Bind {
        /// Account name (used in the webhook path /wechat/{name})
        #[arg(long, short)]
        name: String,

        /// App id
        #[arg(long, short)]
        appid: String,

        /// App secret
        #[arg(long, short)]
        secret: String,

        /// Webhook token configured on the platform; required for the gateway to accept calls
        #[arg(long, short)]
        token: Option<String>,

        /// Save without contacting the platform
        #[arg(long)]
        skip_verify: bool,
    },

    /// List bound accounts (secrets masked).
    List,

    /// Delete a bound account.
    Delete {
        #[arg(long, short)]
        name: String,

        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },

    /// Check that a bound account's credentials still obtain an access token.
    Test {
        #[arg(long, short)]
        name: String,
    },

    /// Upload a cover image and create a draft article.
    Publish {
        #[arg(long, short)]
        name: String,

        #[arg(long, short)]
        title: String,

        /// Article body (HTML allowed by the platform)
        #[arg(long)]
        content: String,

        /// Cover image file (png/jpg)
        #[arg(long, value_name = "FILE")]
        cover: PathBuf,

        #[arg(long)]
        author: Option<String>,
    },

    /// Run the webhook gateway.
    Server {
        /// Account served on the bare /wechat path
        #[arg(long, short)]
        name: Option<String>,

        /// HTTP port (default from config or 5000)
        #[arg(long, short)]
        port: Option<u16>,

        /// Bind address (default from config or 127.0.0.1)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Print the signature the platform would send for a token, timestamp and nonce.
    Sign {
        #[arg(long)]
        token: String,

        #[arg(long)]
        timestamp: String,

        #[arg(long)]
        nonce: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Some(Commands::Server { .. }) => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = cli.config;
    let result = match cli.command {
        Some(Commands::Version) => {
            println!("wxoa {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(config),
        Some(Commands::Bind {
            name,
            appid,
            secret,
            token,
            skip_verify,
        }) => run_bind(config, name, appid, secret, token, skip_verify).await,
        Some(Commands::List) => run_list(config).await,
        Some(Commands::Delete { name, yes }) => run_delete(config, name, yes).await,
        Some(Commands::Test { name }) => run_test(config, name).await,
        Some(Commands::Publish {
            name,
            title,
            content,
            cover,
            author,
        }) => {
            let request = DraftRequest {
                title,
                content,
                cover,
                author,
            };
            run_publish(config, name, request).await
        }
        Some(Commands::Server { name, port, bind }) => run_server(config, name, port, bind).await,
        Some(Commands::Sign {
            token,
            timestamp,
            nonce,
        }) => {
            println!("{}", signature::sign(&token, &timestamp, &nonce));
            Ok(())
        }
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(wxoa::config::default_config_path);
    let dir = wxoa::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn open_store(config_path: Option<PathBuf>) -> anyhow::Result<FileAccountStore> {
    let (config, path) = wxoa::config::load_config(config_path)?;
    let accounts = wxoa::config::resolve_accounts_path(&config, &path);
    Ok(FileAccountStore::load(&accounts).await?)
}

async fn run_bind(
    config_path: Option<PathBuf>,
    name: String,
    app_id: String,
    app_secret: String,
    token: Option<String>,
    skip_verify: bool,
) -> anyhow::Result<()> {
    if skip_verify {
        log::warn!("skipping credential verification for {}", name);
    } else {
        println!("verifying app id and secret for {} ...", name);
        WeChatClient::default()
            .verify_credentials(&app_id, &app_secret)
            .await
            .map_err(|e| anyhow::anyhow!("credential verification failed: {}", e))?;
        println!("credentials verified");
    }

    let store = open_store(config_path).await?;
    let account = Account {
        name: name.clone(),
        app_id,
        app_secret,
        token: token.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
    };
    let masked = account.masked_secret();
    let has_token = account.token.is_some();
    store.bind(account).await?;
    println!("saved {} to {}", name, store.path().display());
    println!("  secret: {}", masked);
    if !has_token {
        println!("  no token set; the webhook gateway will reject calls for this account until one is bound");
    }
    Ok(())
}

async fn run_list(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let store = open_store(config_path).await?;
    let accounts = store.list().await;
    if accounts.is_empty() {
        println!("no accounts bound; use `wxoa bind` to add one");
        return Ok(());
    }
    for a in accounts {
        println!("{}", a.name);
        println!("  appid:  {}", a.app_id);
        println!("  secret: {}", a.masked_secret());
        println!("  token:  {}", if a.token.is_some() { "set" } else { "-" });
    }
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    use std::io::{self, Write};
    let mut stdout = io::stdout();
    write!(stdout, "{} [y/N] ", prompt)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let answer = line.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

async fn run_delete(config_path: Option<PathBuf>, name: String, yes: bool) -> anyhow::Result<()> {
    if !yes && !confirm(&format!("delete account {}?", name))? {
        println!("cancelled");
        return Ok(());
    }
    let store = open_store(config_path).await?;
    if store.remove(&name).await? {
        println!("deleted {}", name);
        Ok(())
    } else {
        anyhow::bail!("account not found: {}", name)
    }
}

async fn run_test(config_path: Option<PathBuf>, name: String) -> anyhow::Result<()> {
    let store = open_store(config_path).await?;
    let account = store.lookup(&name).await?;
    WeChatClient::default()
        .verify_credentials(&account.app_id, &account.app_secret)
        .await
        .map_err(|e| anyhow::anyhow!("connection test failed for {}: {}", name, e))?;
    println!("connection test passed for {}", name);
    Ok(())
}

async fn run_publish(
    config_path: Option<PathBuf>,
    name: String,
    request: DraftRequest,
) -> anyhow::Result<()> {
    let store = open_store(config_path).await?;
    let account = store.lookup(&name).await?;
    println!("publishing \"{}\" to the draft box of {} ...", request.title, name);
    let draft = WeChatClient::default()
        .publish_draft(&account.app_id, &account.app_secret, &request)
        .await?;
    println!("draft created: {}", draft);
    Ok(())
}

async fn run_server(
    config_path: Option<PathBuf>,
    name: Option<String>,
    port: Option<u16>,
    bind: Option<String>,
) -> anyhow::Result<()> {
    let (mut config, path) = wxoa::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    if let Some(b) = bind {
        config.gateway.bind = b;
    }
    if let Some(n) = name {
        config.gateway.default_account = Some(n);
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    wxoa::gateway::run_gateway(config, path).await
}
