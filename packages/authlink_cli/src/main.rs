//! authlink: key hashes, account addresses, ledger registration, the pairing
//! relay and a pairing demo from the command line.
//!
//! Endpoints come from the config file and the `AUTHLINK_*` environment
//! overrides; flags override both.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use authlink::account::{
    derive_address, derive_salt, predict_address, register_account, Address, SaltInput, Username,
};
use authlink::config::AuthConfig;
use authlink::credential::{
    CredentialProvider, ExternalWalletProvider, PasskeyProvider, SoftwareAuthenticator, SoftwareWallet,
};
use authlink::identity::{key_hash, Hash256, Key, KeyAlgo, KeyHash};
use authlink::ledger::{AccountType, HttpLedgerClient};
use authlink::pairing::{PairingRequester, PairingSigner};
use authlink::relay::{server, RelayClient, RelayHub, SimRelay, WsRelayClient};
use authlink::session::SessionKeyManager;

#[derive(Parser)]
#[command(name = "authlink")]
#[command(about = "Credential-backed accounts, session keys and cross-device pairing")]
struct Cli {
    /// JSON config file; defaults apply when absent
    #[arg(short, long, env = "AUTHLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compute the key hash of a credential identity
    KeyHash {
        /// secp256r1 | secp256k1 | ethereum
        #[arg(long)]
        algo: KeyAlgo,
        /// Credential id, compressed key or address, as hex
        identity: String,
    },
    /// Derive an account address
    Address {
        /// Factory address, 0x-prefixed
        #[arg(long)]
        deployer: Address,
        /// Account type code hash, hex
        #[arg(long)]
        code_hash: Hash256,
        /// `<algo>:<base64>` or `ethereum:0x<hex>`
        #[arg(long)]
        key: Key,
        /// Key hash, hex; derived from the key when omitted (not for passkeys)
        #[arg(long)]
        key_hash: Option<KeyHash>,
        #[arg(long, conflicts_with = "username")]
        seed: Option<u32>,
        #[arg(long)]
        username: Option<Username>,
    },
    /// Ask the configured ledger where an account would be deployed
    Predict {
        /// spot | margin | multi
        #[arg(long, default_value = "spot")]
        account_type: AccountType,
        /// `<algo>:<base64>` or `ethereum:0x<hex>`
        #[arg(long)]
        key: Key,
        /// Key hash, hex; derived from the key when omitted (not for passkeys)
        #[arg(long)]
        key_hash: Option<KeyHash>,
        #[arg(long, conflicts_with = "username")]
        seed: Option<u32>,
        #[arg(long)]
        username: Option<Username>,
    },
    /// Register a username on the configured ledger with a software wallet
    Register {
        username: Username,
        #[arg(long, default_value_t = 0)]
        seed: u32,
        /// secp256k1 secret, hex; a fresh wallet is generated when omitted
        #[arg(long, env = "AUTHLINK_WALLET_SECRET", hide_env_values = true)]
        wallet_secret: Option<String>,
    },
    /// Run the websocket pairing relay
    Relay {
        #[arg(long, default_value = "127.0.0.1:8787")]
        listen: SocketAddr,
    },
    /// Pair two software devices and create a session
    PairDemo {
        /// Relay to pair over; overrides the configured relay
        #[arg(long)]
        relay_url: Option<String>,
        /// Pair over an in-process relay instead of a websocket one
        #[arg(long, conflicts_with = "relay_url")]
        in_process: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AuthConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AuthConfig::default(),
    };
    config.apply_env();

    match cli.command {
        Command::KeyHash { algo, identity } => {
            let bytes = hex::decode(identity.trim_start_matches("0x")).context("identity must be hex")?;
            println!("{}", key_hash::hash(algo, &bytes)?);
        }
        Command::Address {
            deployer,
            code_hash,
            key,
            key_hash,
            seed,
            username,
        } => {
            let key_hash = resolve_key_hash(&key, key_hash)?;
            let input = salt_input(seed, username)?;
            let salt = derive_salt(&key, &key_hash, &input);
            println!("key_hash: {}", key_hash);
            println!("salt:     {}", hex::encode(salt.as_bytes()));
            println!("address:  {}", derive_address(&deployer, &code_hash, salt.as_bytes()));
        }
        Command::Predict {
            account_type,
            key,
            key_hash,
            seed,
            username,
        } => {
            let key_hash = resolve_key_hash(&key, key_hash)?;
            let input = salt_input(seed, username)?;
            let ledger = HttpLedgerClient::from_config(&config.ledger);
            let address = predict_address(&ledger, account_type, &key, &key_hash, &input).await?;
            println!("key_hash: {}", key_hash);
            println!("address:  {}", address);
        }
        Command::Register {
            username,
            seed,
            wallet_secret,
        } => {
            let wallet = match wallet_secret {
                Some(secret) => {
                    let bytes = hex::decode(secret.trim_start_matches("0x")).context("wallet secret must be hex")?;
                    SoftwareWallet::from_secret_bytes(&bytes)?
                }
                None => SoftwareWallet::random(),
            };
            let provider = ExternalWalletProvider::new(wallet);
            provider.create_credential(b"authlink-register", username.as_str()).await?;

            let ledger = HttpLedgerClient::from_config(&config.ledger);
            let registration =
                register_account(&ledger, &provider, username, seed, &config.ledger.chain_id).await?;
            println!("Registered {} on {}", registration.username, config.ledger.chain_id);
            println!("key_hash: {}", registration.key_hash);
            println!("address:  {}", registration.address);
        }
        Command::Relay { listen } => {
            let hub = RelayHub::new();
            let (bound, server) = server::spawn(hub, listen)?;
            println!("Relay listening on ws://{}", bound);
            tokio::signal::ctrl_c().await?;
            log::info!("Shutting down relay");
            server.abort();
        }
        Command::PairDemo { relay_url, in_process } => {
            if in_process {
                pair_demo(&SimRelay::new().client(), &config).await?;
            } else {
                if let Some(url) = relay_url {
                    config.pairing.relay_url = url;
                }
                log::info!("Pairing over {}", config.pairing.relay_url);
                pair_demo(&WsRelayClient::from_config(&config.pairing), &config).await?;
            }
        }
    }

    Ok(())
}

fn resolve_key_hash(key: &Key, key_hash: Option<KeyHash>) -> anyhow::Result<KeyHash> {
    match key_hash {
        Some(key_hash) => Ok(key_hash),
        None => Ok(KeyHash::of_key(key)?),
    }
}

fn salt_input(seed: Option<u32>, username: Option<Username>) -> anyhow::Result<SaltInput> {
    match (seed, username) {
        (Some(seed), _) => Ok(SaltInput::Seed(seed)),
        (None, Some(username)) => Ok(SaltInput::Username(username)),
        (None, None) => bail!("one of --seed or --username is required"),
    }
}

async fn pair_demo(relay: &dyn RelayClient, config: &AuthConfig) -> anyhow::Result<()> {
    // The signer device holds a passkey.
    let provider = Arc::new(PasskeyProvider::new(
        SoftwareAuthenticator::new("authlink.demo"),
        "authlink.demo",
    ));
    let credential = provider.create_credential(b"authlink-demo", "demo").await?;
    println!("Signer credential: {}", credential.key_hash()?);

    // The requester device shows a code...
    let requester = PairingRequester::open(relay, config.pairing.clone()).await?;
    println!("Pairing code: {}", requester.code());

    // ...which the signer scans.
    let signer = PairingSigner::join(relay, requester.code(), provider, config.pairing.clone()).await?;
    let signer_task = tokio::spawn(async move { signer.run().await });

    let manager = SessionKeyManager::in_memory(config.session.clone());
    let session = manager
        .create_session_with(&requester, config.session.default_ttl)
        .await?;
    let outcome = signer_task.await??;
    log::debug!("Signer finished: {:?}", outcome);

    println!("Session key:  {}", hex::encode(session.public_key()));
    println!("Authorized by {}", session.key_hash());
    println!("Expires at    {}", session.expire_at());
    Ok(())
}
