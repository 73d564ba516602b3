use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use rowdex::config::EngineConfig;
use rowdex::core::{Column, IndexColumn, Row, RowKey, SearchRow, Table, Value};
use rowdex::index::condition::masks_for;
use rowdex::index::mutation::add_row;
use rowdex::index::{
    collect_rows, ConditionMask, CursorParameters, HashIndex, Index, IndexBase, IndexBuilder,
    IndexType, OrderedIndex, RowIdIndex, SortOrder,
};
use rowdex::session::SessionManager;
use rowdex::stats::{human_bytes, IndexReport};
use rowdex::storage::SnapshotStore;

#[derive(Parser, Debug)]
#[command(name = "rowdex", about = "Index layer of a relational storage engine", version)]
struct Args {
    /// 配置文件（默认 <config_dir>/rowdex/config.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 建表、灌数据、后台构建二级索引，输出代价估算与索引报告
    Demo {
        #[arg(long, default_value_t = 10_000)]
        rows: u64,
        /// 报告以 JSON 输出
        #[arg(long)]
        json: bool,
    },
    /// 校验并概述一个索引快照文件
    Inspect { snapshot: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = EngineConfig::load_or_default(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cfg.log_filter.clone().into()),
        )
        .init();

    match args.cmd {
        Command::Demo { rows, json } => run_demo(&cfg, rows, json).await,
        Command::Inspect { snapshot } => inspect(snapshot),
    }
}

async fn run_demo(cfg: &EngineConfig, rows: u64, json: bool) -> anyhow::Result<()> {
    let options = cfg.index_options();
    let id = Column::new(0, "ID").not_null();
    let name = Column::new(1, "NAME").with_selectivity(80);
    let city = Column::new(2, "CITY").with_selectivity(5);
    let table = Arc::new(Table::new(
        1,
        "PUBLIC",
        "CUSTOMER",
        vec![id.clone(), name.clone(), city.clone()],
    ));

    let primary = Arc::new(RowIdIndex::new(
        1,
        "PRIMARY_KEY_CUSTOMER",
        table.clone(),
        Some(id.clone()),
        &options,
    ));
    let manager = SessionManager::new();
    let loader = manager.create_session();
    const CITIES: [&str; 4] = ["Berlin", "Lima", "Osaka", "Quito"];
    for k in 1..=rows {
        let row = Row::new(
            RowKey(k),
            vec![
                Value::Int(k as i64),
                Value::from(format!("customer-{:06}", k)),
                Value::from(CITIES[(k % CITIES.len() as u64) as usize]),
            ],
        );
        add_row(&*primary, &loader, row).await?;
    }
    loader.commit();
    info!("Loaded {} rows into {}", rows, table.qualified_name());

    let name_base = IndexBase::new(
        2,
        "IDX_CUSTOMER_NAME",
        table.clone(),
        IndexType::non_unique(cfg.data_dir.is_some(), false),
        vec![IndexColumn::asc(name.clone())],
    );
    let by_name: Arc<dyn Index> = match &cfg.data_dir {
        Some(dir) => {
            let store = SnapshotStore::for_index(dir, table.name(), name_base.name());
            Arc::new(OrderedIndex::open(name_base, &options, store)?)
        }
        None => Arc::new(OrderedIndex::new(name_base, &options)),
    };
    let city_base = IndexBase::new(
        3,
        "IDX_CUSTOMER_CITY",
        table.clone(),
        IndexType::non_unique(false, true),
        vec![IndexColumn::asc(city.clone())],
    );
    let by_city: Arc<dyn Index> = Arc::new(HashIndex::new(city_base));

    let mut handles = Vec::new();
    for idx in [&by_name, &by_city] {
        if !idx.need_rebuild() {
            continue;
        }
        let builder = Arc::new(
            IndexBuilder::new(format!("build-{}", idx.name()), primary.clone(), cfg.build.batch_size)
                .commit_every_batch(cfg.build.commit_every_batch),
        );
        handles.push(builder.spawn(manager.create_session(), idx.clone()));
    }
    for h in handles {
        h.await.context("builder task panicked")??;
    }

    let session = manager.create_session();
    let mut eq_city = masks_for(table.columns().len());
    eq_city[city.id] = ConditionMask::EQUALITY;
    let mut range_name = masks_for(table.columns().len());
    range_name[name.id] = ConditionMask::RANGE;
    let order_by_name = SortOrder::ascending(&[name.id]);
    let primary_dyn: Arc<dyn Index> = primary.clone();
    for idx in [&by_name, &by_city, &primary_dyn] {
        info!(
            "cost {:<24} city=?: {:>12.1}  name range: {:>12.1}  order by name: {:>12.1}",
            idx.plan_sql(),
            idx.cost(&session, Some(&eq_city), None),
            idx.cost(&session, Some(&range_name), None),
            idx.cost(&session, None, Some(&order_by_name)),
        );
    }

    let params = CursorParameters::range(
        Some(SearchRow::new(3).with(name.id, "customer-000010")),
        Some(SearchRow::new(3).with(name.id, "customer-000019")),
    )
    .limit(5);
    let mut cursor = by_name.find_with(&session, &params)?;
    for row in collect_rows(&mut cursor)? {
        info!("range hit: {}", row.value(name.id));
    }
    let mut cursor = by_city.lookup(&session, &SearchRow::new(3).with(city.id, "Lima"))?;
    info!("Lima customers: {}", collect_rows(&mut cursor)?.len());

    let reports: Vec<IndexReport> = [&by_name, &by_city]
        .into_iter()
        .map(|idx| idx.report())
        .chain(std::iter::once(primary.report()))
        .collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for r in &reports {
            print!("{}", r);
        }
    }

    for idx in [&by_name, &by_city] {
        println!("{}", idx.create_sql());
        idx.close(&session)?;
    }
    primary.close(&session)?;
    Ok(())
}

fn inspect(path: PathBuf) -> anyhow::Result<()> {
    let store = SnapshotStore::new(path.clone());
    let snap = store
        .load_if_valid()?
        .with_context(|| format!("{} is missing or not a valid index snapshot", path.display()))?;
    println!("index:       {}", snap.index_name);
    println!("table:       {}", snap.table);
    println!("columns:     {:?}", snap.column_ids);
    println!("complete:    {}", snap.complete);
    println!(
        "checkpoint:  {}",
        snap.last_indexed_row_key
            .map_or_else(|| "-".to_string(), |k| k.to_string())
    );
    println!("rows:        {}", snap.rows.len());
    println!("file size:   {}", human_bytes(store.disk_size()));
    Ok(())
}
