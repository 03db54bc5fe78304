use anyhow::{Context, Result};
use jwtgate::auth::login_service::UserDirectory;
use jwtgate::repository::{PgTokenRepository, PgUserDirectory, TokenRepository};
use jwtgate::session::DisabledUserDirectory;
use jwtgate::{
    cli::Cli,
    config::ServerConfig,
    logging, AuthHttpServer, HttpServerState,
};
use std::fs;
use std::process;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // 加载 .env 文件（如果存在）
    let _ = dotenvy::dotenv();

    // 解析命令行参数
    let cli = Cli::parse();

    // 处理子命令
    if let Some(command) = &cli.command {
        match command {
            jwtgate::cli::Commands::Migrate => {
                return run_migrate(&cli).await;
            }
            jwtgate::cli::Commands::GenerateConfig { path } => {
                return generate_config(path);
            }
            jwtgate::cli::Commands::ValidateConfig { path } => {
                return validate_config(path);
            }
            jwtgate::cli::Commands::ShowConfig => {
                return show_config(&cli);
            }
        }
    }

    // 合并日志配置（优先级：CLI > 默认值）
    let log_level = cli.get_log_level().unwrap_or_else(|| "info".to_string());
    let log_format = cli.get_log_format();

    logging::init_logging(&log_level, log_format.as_deref(), cli.quiet)?;

    tracing::info!("🚀 jwtgate 启动中...");

    // 加载配置（按优先级：命令行 > 环境变量 > 配置文件 > 默认值）
    let config = ServerConfig::load(&cli).context("加载配置失败")?;

    if cli.dev {
        tracing::info!("🔧 开发模式已启用");
    }

    // 显示配置信息
    tracing::info!("📊 Server Configuration:");
    tracing::info!("  - Host: {}", config.host);
    tracing::info!("  - Port: {}", config.port);
    tracing::info!("  - Internal Auth: {}", config.use_internal_auth);
    tracing::info!("  - Site Name: {}", config.token.site_name);
    tracing::info!("  - Token TTL: {}s", config.token.tokens_expire_after);
    tracing::info!("  - Refresh Tokens: {}", config.token.refresh_tokens);
    if config.token.refresh_tokens {
        tracing::info!(
            "  - Refresh Token TTL: {}s",
            config.token.refresh_tokens_expire_after
        );
    }
    tracing::info!("  - Log Level: {}", config.log_level);

    // 连接数据库
    let pool = match sqlx::PgPool::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("❌ 数据库连接失败: {}", e);
            tracing::error!("💡 请检查 DATABASE_URL 后重试");
            process::exit(1);
        }
    };

    let repo: Arc<dyn TokenRepository> = Arc::new(PgTokenRepository::new(pool.clone()));
    let users: Arc<dyn UserDirectory> = if config.use_internal_auth {
        Arc::new(PgUserDirectory::new(pool))
    } else {
        tracing::warn!("⚠️ 内置账号系统已关闭，凭证登录将全部拒绝（token 登录不受影响）");
        Arc::new(DisabledUserDirectory)
    };

    let state = HttpServerState::new(repo, users, config.token.clone());
    let server = AuthHttpServer::new(state, config.host.clone(), config.port);

    // 运行服务器
    if let Err(e) = server.start().await {
        tracing::error!("❌ 服务器运行失败: {}", e);
        process::exit(1);
    }

    Ok(())
}

/// 生成默认配置文件
fn generate_config(path: &str) -> Result<()> {
    let default_config = r#"# jwtgate 配置文件
# 此文件由 jwtgate generate-config 生成

host = "0.0.0.0"
port = 9310
database_url = "postgres://localhost/jwtgate"
log_level = "info"
# log_format = "compact"

# 凭证登录使用内置的 jwtgate_users 表；接入外部账号系统时关闭
use_internal_auth = true

[token]
site_name = "My Site"
site_url = "http://localhost:9310"
# 密钥模板：{site_name} / {site_url} 占位符会被替换后转 snake_case
secret_key_format = "{site_name}_login"
tokens_expire_after = 86400
refresh_tokens = true
refresh_tokens_expire_after = 1209600
session_duration = 3600
"#;

    fs::write(path, default_config).with_context(|| format!("无法写入配置文件: {}", path))?;

    println!("✅ 配置文件已生成: {}", path);
    Ok(())
}

/// 验证配置文件
fn validate_config(path: &str) -> Result<()> {
    let config = ServerConfig::from_toml_file(path)
        .with_context(|| format!("配置文件验证失败: {}", path))?;

    println!("✅ 配置文件有效: {}", path);
    println!("📊 配置摘要:");
    println!("  - Host: {}", config.host);
    println!("  - Port: {}", config.port);
    println!("  - Site Name: {}", config.token.site_name);
    println!("  - Token TTL: {}s", config.token.tokens_expire_after);

    Ok(())
}

// 编译时自动扫描 migrations/ 目录，按文件名排序嵌入
include!(concat!(env!("OUT_DIR"), "/migrations.rs"));

/// 执行数据库迁移
async fn run_migrate(cli: &Cli) -> Result<()> {
    let _ = dotenvy::dotenv();

    // 获取 DATABASE_URL（从 CLI > 环境变量）
    let database_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("需要 DATABASE_URL，请在 .env 或环境变量中配置")?;

    println!("🔌 连接数据库...");
    let pool = sqlx::PgPool::connect(&database_url)
        .await
        .context("数据库连接失败，请检查 DATABASE_URL")?;

    // 创建迁移记录表（如果不存在）
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS jwtgate_migrations (
            id SERIAL PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&pool)
    .await
    .context("创建迁移记录表失败")?;

    // 查询已执行的迁移
    let applied: Vec<String> =
        sqlx::query_scalar("SELECT name FROM jwtgate_migrations ORDER BY id")
            .fetch_all(&pool)
            .await
            .context("查询迁移记录失败")?;

    let mut count = 0;
    for (name, sql) in MIGRATIONS {
        if applied.contains(&name.to_string()) {
            println!("  ⏭ {} (已执行，跳过)", name);
            continue;
        }

        println!("  ▶ 执行 {}...", name);
        sqlx::raw_sql(sql)
            .execute(&pool)
            .await
            .with_context(|| format!("执行迁移失败: {}", name))?;

        // 记录迁移
        sqlx::query("INSERT INTO jwtgate_migrations (name) VALUES ($1)")
            .bind(*name)
            .execute(&pool)
            .await
            .with_context(|| format!("记录迁移状态失败: {}", name))?;

        println!("  ✅ {} 完成", name);
        count += 1;
    }

    if count == 0 {
        println!("✅ 数据库已是最新，无需迁移");
    } else {
        println!("✅ 成功执行 {} 个迁移", count);
    }

    pool.close().await;
    Ok(())
}

/// 显示最终配置（合并后的配置）
fn show_config(cli: &Cli) -> Result<()> {
    logging::init_logging("info", None, false)?;

    let config = ServerConfig::load(cli).context("加载配置失败")?;

    println!("📊 最终配置（合并后的配置）:");
    println!("{}", serde_json::to_string_pretty(&config)?);

    Ok(())
}
