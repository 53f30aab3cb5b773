// ==========================================
// forecast-cube 命令行入口
// ==========================================
// 小型维护面: 准备 forecastplan 的 schema 并查看生效配置。
// 库才是真正的产品，这里不触碰模型本身。
// ==========================================

use anyhow::{bail, Context, Result};
use tracing::info;

use forecast_cube::config::AppConfig;
use forecast_cube::logging;
use forecast_cube::measure::MeasureCatalogue;
use forecast_cube::repository::ForecastPlanRepository;

fn main() -> Result<()> {
    logging::init();
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("init-db") => init_db(args.get(2).map(String::as_str)),
        Some("show-config") => show_config(),
        _ => {
            eprintln!("usage: forecast-cube <init-db [path]|show-config>");
            Ok(())
        }
    }
}

/// 创建或迁移 forecastplan 表
fn init_db(path: Option<&str>) -> Result<()> {
    let config = AppConfig::load(AppConfig::default_path()?)?;
    let db_path = match path.or(config.settings.db_path.as_deref()) {
        Some(p) => p.to_string(),
        None => bail!("no database path given and none configured"),
    };
    let catalogue = MeasureCatalogue::standard()?;
    let columns: Vec<String> = catalogue
        .stored()?
        .iter()
        .map(|m| m.name.clone())
        .collect();
    let repo = ForecastPlanRepository::new(&db_path, columns)
        .with_context(|| format!("opening {db_path}"))?;
    repo.ensure_schema()?;
    info!(db = %db_path, "forecastplan schema ready");
    Ok(())
}

fn show_config() -> Result<()> {
    let config = AppConfig::load(AppConfig::default_path()?)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
