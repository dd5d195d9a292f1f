//! chathub - 多后端聊天机器人中枢
//!
//! 入口：加载配置、初始化日志、注册服务与插件、打开 Bot，周期保存，收到关闭信号后保存并关闭。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chathub::commands::CommandPlugin;
use chathub::config::{load_config, AppConfig};
use chathub::core::{BotBuilder, Plugin, Service, ServiceState, ShutdownManager};
use chathub::plugins::{
    invite_command, invite_help, quit_command, quit_help, stats_command, stats_help, AvatarPlugin, ComicPlugin,
    DirectMessageInvitePlugin, PlayedPlugin, TranscriptRenderer,
};
use chathub::services::ConsoleService;

/// 在服务上注册共享插件与按服务新建的有状态插件
fn register(
    builder: &mut BotBuilder,
    service: Arc<dyn Service>,
    shared: &[Arc<dyn Plugin>],
    config: &AppConfig,
) -> anyhow::Result<()> {
    let name = service.name().to_string();
    builder.register_service(service)?;
    for plugin in shared {
        builder.register_plugin(&name, Arc::clone(plugin))?;
    }
    builder.register_plugin(&name, Arc::new(PlayedPlugin::new(config.played.clone())))?;
    builder.register_plugin(
        &name,
        Arc::new(ComicPlugin::new(config.comic.log_capacity, Arc::new(TranscriptRenderer))),
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    chathub::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let mut router = CommandPlugin::new();
    router
        .add_command("invite", Arc::new(invite_command), Some(invite_help()))
        .add_command("join", Arc::new(invite_command), None)
        .add_command("stats", Arc::new(stats_command), Some(stats_help()))
        .add_command("info", Arc::new(stats_command), None)
        .add_command("stat", Arc::new(stats_command), None)
        .add_command("quit", quit_command(Arc::clone(&shutdown)), Some(quit_help()));

    let shared: Vec<Arc<dyn Plugin>> = vec![
        Arc::new(router),
        Arc::new(DirectMessageInvitePlugin::new()),
        Arc::new(AvatarPlugin::new()),
    ];

    let mut builder = BotBuilder::from_config(&config.bot);
    if config.console.enabled {
        let console = Arc::new(ConsoleService::new(config.console.clone(), config.bot.message_buffer));
        register(&mut builder, console, &shared, &config)?;
    }
    if builder.service_count() == 0 {
        anyhow::bail!("No services enabled");
    }

    let bot = builder.build();
    let opened = bot.open().await;
    if opened == 0 {
        bot.close();
        anyhow::bail!("No service could be opened");
    }
    tracing::info!("chathub {} started with {} services", env!("CARGO_PKG_VERSION"), opened);

    let mut ticker = tokio::time::interval(Duration::from_secs(config.bot.save_interval_secs.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                bot.save().await;
                let all_closed = bot
                    .service_names()
                    .iter()
                    .all(|name| bot.service_state(name) == Some(ServiceState::Closed));
                if all_closed {
                    tracing::info!("All services closed");
                    break;
                }
            }
            _ = shutdown.wait_for_shutdown() => break,
        }
    }

    match shutdown.reason() {
        Some(reason) => tracing::info!("Shutting down: {:?}", reason),
        None => tracing::info!("Shutting down: no open services left"),
    }

    let report = bot.save().await;
    tracing::info!(
        "Final save: {} written, {} skipped, {} failed",
        report.written,
        report.skipped,
        report.failed
    );
    bot.close();
    Ok(())
}
