use alloy::{
    json_abi::{Event, Function, JsonAbi},
    primitives::{hex, Address},
};
use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use contract_bind::{
    config::{Config, GasConfig},
    ethereum::{
        abi::{self, AbiResolver, AbiSource},
        codec,
        provider::{NodeBackend, ProviderManager},
        signer::Keyring,
        utils, BoundContract, CallOpts, DecodedEvent, FilterOpts, TransactOpts, TransactionHandle,
        WatchOpts,
    },
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = cli().get_matches();

    if matches.get_flag("generate-config") {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let mut config = Config::load_or_default(config_path).await;

    if let Some(network) = matches.get_one::<String>("network") {
        config.default_network = network.clone();
    }

    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        config
            .networks
            .entry(config.default_network.clone())
            .and_modify(|network| network.rpc_url = rpc_url.clone())
            .or_insert_with(|| contract_bind::config::NetworkConfig {
                rpc_url: rpc_url.clone(),
                chain_id: 0,
                explorer_api_url: None,
                gas: GasConfig::default(),
            });
    }

    debug!("Default network: {}", config.default_network);

    match matches.subcommand() {
        Some(("selector", sub)) => selector(sub),
        Some((name, sub)) => {
            if let Err(e) = run(name, sub, &matches, config).await {
                error!("{} failed: {}", name, e);
                return Err(e);
            }
            Ok(())
        }
        None => Err(anyhow!("No command given. Run with --help for usage")),
    }
}

fn cli() -> Command {
    let address = Arg::new("address")
        .value_name("ADDRESS")
        .required(true)
        .help("Contract address");
    let where_clause = Arg::new("where")
        .short('w')
        .long("where")
        .value_name("PARAM=VALUES")
        .action(ArgAction::Append)
        .help("Restrict an indexed parameter to comma separated values");

    Command::new("contract-bind")
        .version("0.1.0")
        .about("Call, transact with and watch Ethereum contracts through their ABI")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .global(true)
                .help("Network to use (ethereum, sepolia, local or any configured name)"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .global(true)
                .help("RPC endpoint URL (ws:// or ipc path needed for watch)"),
        )
        .arg(
            Arg::new("abi")
                .long("abi")
                .value_name("FILE")
                .global(true)
                .help("ABI or compiler artifact JSON; fetched from the block explorer when omitted"),
        )
        .arg(
            Arg::new("signature")
                .long("signature")
                .value_name("SIG")
                .action(ArgAction::Append)
                .global(true)
                .conflicts_with("abi")
                .help("Human-readable ABI entry, e.g. 'function balanceOf(address) returns (uint256)'"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("call")
                .about("Invoke a read-only method and print the decoded result")
                .arg(address.clone())
                .arg(Arg::new("method").required(true).help("Method name or full signature"))
                .arg(Arg::new("args").num_args(0..).allow_hyphen_values(true).help("Method arguments"))
                .arg(
                    Arg::new("block")
                        .short('b')
                        .long("block")
                        .default_value("latest")
                        .help("latest, pending or a block number"),
                )
                .arg(Arg::new("from").long("from").value_name("ADDRESS").help("Caller address")),
        )
        .subcommand(
            Command::new("send")
                .about("Sign and submit a transaction invoking a method")
                .arg(address.clone())
                .arg(Arg::new("method").required(true).help("Method name or full signature"))
                .arg(Arg::new("args").num_args(0..).allow_hyphen_values(true).help("Method arguments"))
                .arg(Arg::new("value").long("value").help("Wei to attach"))
                .arg(Arg::new("nonce").long("nonce").value_parser(clap::value_parser!(u64)))
                .arg(
                    Arg::new("gas-limit")
                        .long("gas-limit")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("skip-estimate")
                        .long("skip-estimate")
                        .action(ArgAction::SetTrue)
                        .help("Use the network's default gas limit instead of estimating"),
                )
                .arg(
                    Arg::new("gas-price")
                        .long("gas-price")
                        .value_parser(clap::value_parser!(u128))
                        .help("Send a legacy transaction at this price (wei)"),
                )
                .arg(
                    Arg::new("no-send")
                        .long("no-send")
                        .action(ArgAction::SetTrue)
                        .help("Sign only and print the raw transaction"),
                ),
        )
        .subcommand(
            Command::new("logs")
                .about("Query historical events")
                .arg(address.clone())
                .arg(Arg::new("event").required(true).help("Event name or full signature"))
                .arg(
                    Arg::new("from-block")
                        .long("from")
                        .default_value("0")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(
                    Arg::new("to-block")
                        .long("to")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(where_clause.clone()),
        )
        .subcommand(
            Command::new("watch")
                .about("Stream events until interrupted")
                .arg(address)
                .arg(Arg::new("event").required(true).help("Event name or full signature"))
                .arg(
                    Arg::new("from-block")
                        .long("from")
                        .value_parser(clap::value_parser!(u64))
                        .help("Replay logs from this block before streaming"),
                )
                .arg(where_clause),
        )
        .subcommand(
            Command::new("selector")
                .about("Print the selector of a function or the topic of an event")
                .arg(
                    Arg::new("signature")
                        .required(true)
                        .help("e.g. 'transfer(address,uint256)' or 'event Transfer(address indexed,address indexed,uint256)'"),
                ),
        )
}

async fn run(command: &str, sub: &ArgMatches, global: &ArgMatches, config: Config) -> Result<()> {
    let address = utils::validate_address(required(sub, "address")?)?;
    let abi = resolve_abi(global, &config, address).await?;

    let network = config.network(None)?.clone();
    let buffer_size = config.subscription.buffer_size;
    let private_key = config.private_key();
    let manager = ProviderManager::new(config);
    let backend = manager.get_backend(None).await?;
    let contract = BoundContract::new(address, abi, backend);

    match command {
        "call" => call(&contract, sub).await,
        "send" => send(&contract, sub, &network.gas, private_key).await,
        "logs" => logs(&contract, sub).await,
        "watch" => watch(&contract, sub, buffer_size).await,
        other => Err(anyhow!("Unknown command '{}'", other)),
    }
}

async fn resolve_abi(global: &ArgMatches, config: &Config, address: Address) -> Result<JsonAbi> {
    if let Some(path) = global.get_one::<String>("abi") {
        return abi::load_abi_file(path).await;
    }

    if let Some(signatures) = global.get_many::<String>("signature") {
        let signatures: Vec<&String> = signatures.collect();
        return abi::parse_signatures(&signatures);
    }

    let network = config.network(None)?;
    let mut resolver = AbiResolver::new(AbiSource {
        explorer_api_key: config.explorer_api_key.clone(),
        ..AbiSource::default()
    });
    resolver
        .get_abi(address, &config.default_network, network.explorer_api_url.as_deref())
        .await
}

async fn call(contract: &BoundContract<NodeBackend>, sub: &ArgMatches) -> Result<()> {
    let (function, args) = method_and_args(contract, sub)?;

    let mut opts = CallOpts {
        block: utils::parse_block_tag(required(sub, "block")?)?,
        ..CallOpts::default()
    };
    if let Some(from) = sub.get_one::<String>("from") {
        opts = opts.with_from(utils::validate_address(from)?);
    }

    let values = utils::parse_arguments(&function.inputs, &args)?;
    let result = contract.call(&opts, &function.signature(), &values).await?;
    print_json(&utils::values_to_json(&result))
}

async fn send(
    contract: &BoundContract<NodeBackend>,
    sub: &ArgMatches,
    gas: &GasConfig,
    private_key: Option<String>,
) -> Result<()> {
    let private_key = private_key.ok_or_else(|| {
        anyhow!("No signing key available. Set the environment variable named by signer.private_key_env")
    })?;
    let keyring = Keyring::from_private_key(&private_key)?;
    let from = keyring
        .addresses()
        .first()
        .copied()
        .ok_or_else(|| anyhow!("Keyring holds no keys"))?;

    let (function, args) = method_and_args(contract, sub)?;
    let values = utils::parse_arguments(&function.inputs, &args)?;

    let mut opts = transact_opts(sub, gas, from, Arc::new(keyring))?;
    if let Some(value) = sub.get_one::<String>("value") {
        opts = opts.with_value(utils::parse_amount(value)?);
    }

    let handle = contract.transact(&opts, &function.signature(), &values).await?;
    print_json(&handle_to_json(&handle))
}

fn transact_opts(
    sub: &ArgMatches,
    gas: &GasConfig,
    from: Address,
    keyring: Arc<Keyring>,
) -> Result<TransactOpts> {
    let mut opts = TransactOpts::new(from, keyring);

    if let Some(nonce) = sub.get_one::<u64>("nonce") {
        opts = opts.with_nonce(*nonce);
    }

    match sub.get_one::<u64>("gas-limit") {
        Some(limit) => opts = opts.with_gas_limit(*limit),
        None if sub.get_flag("skip-estimate") => opts = opts.with_gas_limit(gas.default_gas_limit),
        None => {}
    }

    if let Some(price) = sub.get_one::<u128>("gas-price") {
        if let Some(max) = gas.max_gas_price {
            if *price > u128::from(max) {
                return Err(anyhow!(
                    "Gas price {} exceeds the configured maximum of {}",
                    price,
                    max
                ));
            }
        }
        opts = opts.with_gas_price(*price);
    } else if let (Some(max_fee), Some(tip)) = (gas.max_gas_price, gas.priority_fee) {
        opts = opts.with_eip1559_fees(u128::from(max_fee), u128::from(tip));
    }

    if sub.get_flag("no-send") {
        opts = opts.no_send();
    }

    Ok(opts)
}

async fn logs(contract: &BoundContract<NodeBackend>, sub: &ArgMatches) -> Result<()> {
    let event = event_for(contract, sub)?;
    let constraints = where_clauses(&event, sub)?;

    let opts = FilterOpts {
        start: sub.get_one::<u64>("from-block").copied().unwrap_or_default(),
        end: sub.get_one::<u64>("to-block").copied(),
    };

    let batch = contract
        .filter(&opts, &event.signature(), &constraints)
        .await?;

    let mut events = Vec::with_capacity(batch.remaining());
    for decoded in batch {
        events.push(event_to_json(&decoded?));
    }
    print_json(&Value::Array(events))
}

async fn watch(contract: &BoundContract<NodeBackend>, sub: &ArgMatches, buffer: usize) -> Result<()> {
    let event = event_for(contract, sub)?;
    let constraints = where_clauses(&event, sub)?;

    let opts = WatchOpts {
        start: sub.get_one::<u64>("from-block").copied(),
        buffer,
    };

    let mut iterator = contract
        .watch(&opts, &event.signature(), &constraints)
        .await?;

    let interrupt = iterator.closer();
    let closer = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing subscription");
            closer.close();
        }
    });

    while iterator.next().await {
        if let Some(decoded) = iterator.event() {
            println!("{}", serde_json::to_string(&event_to_json(decoded))?);
        }
    }

    match iterator.error() {
        Some(e) => Err(anyhow!("Subscription ended: {}", e)),
        None if interrupt.is_closed() => {
            debug!("Subscription closed on request");
            Ok(())
        }
        None => Ok(()),
    }
}

fn selector(sub: &ArgMatches) -> Result<()> {
    let signature = required(sub, "signature")?.trim();

    let output = match signature.strip_prefix("event ") {
        Some(_) => {
            let event = Event::parse(signature).map_err(|e| anyhow!("Invalid event: {}", e))?;
            json!({
                "signature": event.signature(),
                "topic": format!("0x{}", hex::encode(codec::topic_for_event(&event))),
            })
        }
        None => {
            let function =
                Function::parse(signature).map_err(|e| anyhow!("Invalid function: {}", e))?;
            json!({
                "signature": function.signature(),
                "selector": format!("0x{}", hex::encode(function.selector())),
            })
        }
    };
    print_json(&output)
}

fn method_and_args(
    contract: &BoundContract<NodeBackend>,
    sub: &ArgMatches,
) -> Result<(Function, Vec<String>)> {
    let args: Vec<String> = sub
        .get_many::<String>("args")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let function = contract
        .descriptor()
        .method(required(sub, "method")?, Some(args.len()))?
        .clone();
    Ok((function, args))
}

fn event_for(contract: &BoundContract<NodeBackend>, sub: &ArgMatches) -> Result<Event> {
    Ok(contract.descriptor().event(required(sub, "event")?)?.clone())
}

fn where_clauses(
    event: &Event,
    sub: &ArgMatches,
) -> Result<Vec<Option<Vec<alloy::dyn_abi::DynSolValue>>>> {
    let clauses: Vec<String> = sub
        .get_many::<String>("where")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    utils::parse_constraints(event, &clauses)
}

fn required<'a>(sub: &'a ArgMatches, name: &str) -> Result<&'a str> {
    sub.get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing argument '{}'", name))
}

fn event_to_json(event: &DecodedEvent) -> Value {
    let fields: Map<String, Value> = event
        .fields
        .iter()
        .map(|(name, value)| (name.clone(), utils::value_to_json(value)))
        .collect();

    json!({
        "event": event.name,
        "blockNumber": event.raw.block_number,
        "transactionHash": event.raw.transaction_hash,
        "logIndex": event.raw.log_index,
        "removed": event.raw.removed,
        "args": fields,
    })
}

fn handle_to_json(handle: &TransactionHandle) -> Value {
    let mut output = json!({
        "hash": handle.hash,
        "from": handle.from.to_checksum(None),
        "to": handle.to.map(|to| to.to_checksum(None)),
        "nonce": handle.nonce,
        "submitted": handle.submitted,
    });
    if !handle.submitted {
        output["raw"] = Value::String(format!("0x{}", hex::encode(&handle.raw)));
    }
    output
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
