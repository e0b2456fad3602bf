/// Probe a UDF server - configuration, symbol resolution, recent bars and a quote
use chartlink::config::load_config;
use chartlink::datafeed::UdfDatafeed;
use chartlink::realtime::period_length_seconds;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let symbol_name = std::env::args().nth(1).unwrap_or_else(|| "AAPL".to_string());
    let resolution = std::env::args().nth(2).unwrap_or_else(|| "D".to_string());

    let settings = load_config(&config_path)?;

    println!("🔌 UDF probe: {}", settings.datafeed_url);
    println!("====================\n");

    let datafeed = UdfDatafeed::connect(&settings)?;
    datafeed.initialize().await?;

    let configuration = datafeed.configuration().await;
    println!("⚙️  Configuration:");
    println!("   Search: {}", configuration.supports_search);
    println!("   Group request: {}", configuration.supports_group_request);
    println!("   Marks: {}", configuration.supports_marks);
    println!("   Resolutions: {}", configuration.supported_resolutions.join(", "));

    let symbol = match datafeed.resolve_symbol(&symbol_name).await {
        Ok(symbol) => symbol,
        Err(e) => {
            println!("\n❌ Cannot resolve {}: {}", symbol_name, e);
            return Ok(());
        }
    };

    println!("\n🏷️  {} ({})", symbol.full_name, symbol.description);
    println!(
        "   Type: {}  Session: {}  Timezone: {}",
        symbol.symbol_type, symbol.session, symbol.timezone
    );

    let to = chrono::Utc::now().timestamp();
    let from = to - period_length_seconds(&resolution, 10)?;

    match datafeed.get_bars(&symbol, &resolution, from, to).await {
        Ok(bars) => {
            println!("\n📈 Last {} bars ({}):", bars.len(), resolution);
            for bar in bars.iter().rev().take(10) {
                println!(
                    "   {}  O:{:.2} H:{:.2} L:{:.2} C:{:.2}",
                    bar.time, bar.open, bar.high, bar.low, bar.close
                );
            }
        }
        Err(e) => println!("\n⚠️  No bars: {}", e),
    }

    match datafeed.get_quotes(&[symbol.ticker().to_string()]).await {
        Ok(quotes) => {
            for quote in quotes {
                let fields = serde_json::Value::Object(quote.v);
                println!("\n💬 {} [{}]: {}", quote.n, quote.s, fields);
            }
        }
        Err(e) => println!("\n⚠️  Quotes unavailable: {}", e),
    }

    Ok(())
}
