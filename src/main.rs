// main.rs
use std::io::{self, Write};

use anyhow::Result;
use chrono::Utc;
use once_cell::sync::Lazy;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use media_index::api::{format_age, MediaSummary, ScanReport, SemanticHit};
use media_index::config::{AppConfig, CONFIG_FILE};
use media_index::{MediaLibrary, MediaLibraryBuilder, ScanMode, ScanPhase};

/// 全局配置（进程内只读一次）
static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::load);

const HELP: &str = "\
命令:
  scan                 增量扫描配置中的根目录
  full                 全量扫描（已存在的内容会被跳过）
  status               查看断点状态
  reset                重置断点，下次扫描按全量执行
  stats                查看库统计
  ? <文本>             语义检索
  similar <id>         查找与某条记录相似的媒体
  collections          列出集合
  collect <名称> <id,id,...>  创建集合并加入记录
  add <集合id> <id,id,...>    向已有集合加入记录
  export <集合id>      把集合导出为 JSON
  <文本> [--过滤]      元数据查询，例如: beach --kind=image --tag=sunset --after=2024-01-01
  help                 显示帮助
  quit                 退出";

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_index=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !std::path::Path::new(CONFIG_FILE).exists() {
        AppConfig::generate_default_config(CONFIG_FILE)?;
        println!(" 已生成默认配置文件: {}", CONFIG_FILE);
    }

    println!(" [AI] 正在加载模型 (首次运行需下载)...");
    let library = MediaLibraryBuilder::new().with_config(CONFIG.clone()).build()?;
    println!(" [AI] 模型加载完毕！");

    println!("--- 媒体索引 ---");
    println!(" 扫描目录: {:?}", CONFIG.scan.roots);
    println!(" 输入 'help' 查看命令 (输入 'quit' 退出)");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        if let Err(e) = run_command(&library, input) {
            println!("出错: {}", e);
        }
    }

    Ok(())
}

fn run_command(library: &MediaLibrary, input: &str) -> Result<()> {
    let (command, rest) = match input.split_once(char::is_whitespace) {
        Some((c, r)) => (c, r.trim()),
        None => (input, ""),
    };

    match command {
        "help" => println!("{}", HELP),
        "scan" => scan(library, ScanMode::Incremental)?,
        "full" => scan(library, ScanMode::Full)?,
        "status" => {
            let status = library.checkpoint_status()?;
            match status.last_scan_time {
                Some(time) => println!(
                    " 上次扫描: {} ({})，处理文件数: {}",
                    time.to_rfc3339(),
                    format_age(time, Utc::now()),
                    status.processed_count
                ),
                None => println!(" 尚未扫描，下次扫描将按全量执行"),
            }
        }
        "reset" => {
            library.reset_checkpoint()?;
            println!(" 断点已重置");
        }
        "stats" => {
            let stats = library.stats()?;
            println!(" 总文件数: {}  向量条目: {}", stats.total_files, stats.vector_entries);
            for kind in &stats.by_kind {
                println!("   {:<10} {}", kind.kind, kind.count);
            }
            if !stats.top_tags.is_empty() {
                let tags: Vec<String> = stats
                    .top_tags
                    .iter()
                    .map(|t| format!("{}({})", t.name, t.usage_count))
                    .collect();
                println!(" 热门标签: {}", tags.join(", "));
            }
        }
        "?" => {
            let hits = library.semantic_search(rest, CONFIG.search.semantic_limit)?;
            print_hits(&hits);
        }
        "similar" => {
            let id: u64 = rest.parse().map_err(|_| anyhow::anyhow!("无效的 id: {}", rest))?;
            let hits = library.similar_to(id, CONFIG.search.semantic_limit)?;
            print_hits(&hits);
        }
        "collections" => {
            let collections = library.collections()?;
            if collections.is_empty() {
                println!(" 还没有集合");
            }
            for c in &collections {
                println!(" [{}] {} ({} 项)", c.id, c.name, c.item_count);
                if let Some(ref description) = c.description {
                    println!("      {}", description);
                }
            }
        }
        "collect" => {
            let (name, ids) = rest.rsplit_once(char::is_whitespace).unwrap_or((rest, ""));
            let collection = library.create_collection(name, None, &parse_ids(ids)?)?;
            println!(" 已创建集合 [{}] {}，包含 {} 项", collection.id, collection.name, collection.item_count);
        }
        "add" => {
            let (id, ids) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            let id: u64 = id.parse().map_err(|_| anyhow::anyhow!("无效的集合 id: {}", id))?;
            let added = library.add_to_collection(id, &parse_ids(ids)?)?;
            println!(" 新增 {} 项", added);
        }
        "export" => {
            let id: u64 = rest.parse().map_err(|_| anyhow::anyhow!("无效的集合 id: {}", rest))?;
            let path = library.export_collection(id)?;
            println!(" 已导出到 {}", path.display());
        }
        _ => {
            let results = library.query_text(input)?;
            print_results(&results);
        }
    }
    Ok(())
}

/// 解析逗号分隔的 id 列表
fn parse_ids(input: &str) -> Result<Vec<u64>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().map_err(|_| anyhow::anyhow!("无效的 id: {}", s)))
        .collect()
}

fn scan(library: &MediaLibrary, mode: ScanMode) -> Result<()> {
    let mut last_phase = ScanPhase::Idle;
    let report = library.scan_configured_with_progress(mode, |phase, done, total| {
        if phase != last_phase {
            println!(" [{:?}]", phase);
            last_phase = phase;
        }
        if phase == ScanPhase::Processing && total > 0 && (done == total || done % 10 == 0) && done > 0 {
            println!("   {}/{}", done, total);
        }
    })?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!("扫描完成 ({}, {} ms)", report.mode, report.took_ms);
    println!("Processed: {}", report.stats.processed);
    println!("Skipped: {}", report.stats.skipped);
    println!("Errors: {}", report.stats.errors);
    println!("Deleted: {}", report.stats.deleted);
    println!("Total: {}", report.total());
}

fn print_results(results: &[MediaSummary]) {
    if results.is_empty() {
        println!("没有找到相关结果。");
        return;
    }
    println!("找到 {} 条结果:", results.len());
    for r in results {
        println!(
            " [{}] {} ({}, {}, {})",
            r.id,
            r.path,
            r.kind,
            r.size_display,
            format_age(r.created_at, Utc::now())
        );
        if let Some(ref description) = r.description {
            println!("      {}", description);
        }
        if !r.tags.is_empty() {
            println!("      标签: {}", r.tags.join(", "));
        }
    }
}

fn print_hits(hits: &[SemanticHit]) {
    if hits.is_empty() {
        println!("没有找到相关结果。");
        return;
    }
    for hit in hits {
        match &hit.record {
            Some(record) => println!(" {:.3}  [{}] {}", hit.score, record.id, record.path),
            None => println!(" {:.3}  [{}] {} (已删除)", hit.score, hit.media_id, hit.path),
        }
    }
}
