//! Bot 构建器：注册阶段
//!
//! 服务与插件只能在这里（单线程、`&mut self`）注册；`build` 之后注册表只读，
//! 分发路径读取注册表无需加锁。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::bot::{Bot, ServiceEntry};
use super::error::RegistryError;
use super::plugin::Plugin;
use super::service::Service;
use super::storage::BlobStorage;
use crate::config::BotSection;
use crate::plugins::HelpPlugin;

/// Bot 构建器
pub struct BotBuilder {
    storage: BlobStorage,
    save_timeout: Duration,
    services: HashMap<String, ServiceEntry>,
    help_plugin: Option<Arc<dyn Plugin>>,
}

impl BotBuilder {
    /// 创建构建器；插件状态写入 data_dir
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            storage: BlobStorage::new(data_dir),
            save_timeout: Duration::from_secs(10),
            services: HashMap::new(),
            help_plugin: Some(Arc::new(HelpPlugin::new())),
        }
    }

    /// 按 [bot] 配置段创建
    pub fn from_config(section: &BotSection) -> Self {
        Self::new(&section.data_dir).with_save_timeout(Duration::from_secs(section.save_timeout_secs))
    }

    /// 单个插件 save 的超时
    pub fn with_save_timeout(mut self, timeout: Duration) -> Self {
        self.save_timeout = timeout;
        self
    }

    /// 不自动注册 Help 插件
    pub fn without_help(mut self) -> Self {
        self.help_plugin = None;
        self
    }

    /// 注册服务；同时在该服务上注册共享的 Help 插件
    pub fn register_service(&mut self, service: Arc<dyn Service>) -> Result<&mut Self, RegistryError> {
        let name = service.name().to_string();
        if self.services.contains_key(&name) {
            return Err(RegistryError::DuplicateService(name));
        }
        self.services.insert(name.clone(), ServiceEntry::new(service));
        tracing::debug!("Registered service: {}", name);

        if let Some(help) = self.help_plugin.clone() {
            self.register_plugin(&name, help)?;
        }
        Ok(self)
    }

    /// 在服务上注册插件；同一实例可注册到多个服务
    pub fn register_plugin(
        &mut self,
        service_name: &str,
        plugin: Arc<dyn Plugin>,
    ) -> Result<&mut Self, RegistryError> {
        let entry = self
            .services
            .get_mut(service_name)
            .ok_or_else(|| RegistryError::UnknownService(service_name.to_string()))?;

        let plugin_name = plugin.name().to_string();
        if entry.plugins.contains_key(&plugin_name) {
            return Err(RegistryError::DuplicatePlugin {
                service: service_name.to_string(),
                plugin: plugin_name,
            });
        }
        tracing::debug!("Registered plugin {} on {}", plugin_name, service_name);
        entry.plugins.insert(plugin_name, plugin);
        Ok(self)
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// 结束注册阶段
    pub fn build(self) -> Arc<Bot> {
        Arc::new(Bot::new(self.services, self.storage, self.save_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SimplePlugin;
    use crate::services::MockService;

    #[test]
    fn test_register_service_adds_help() {
        let mut builder = BotBuilder::new("unused");
        builder.register_service(Arc::new(MockService::new("irc"))).unwrap();
        let bot = builder.build();
        let plugins = bot.plugins("irc").unwrap();
        assert!(plugins.contains_key("Help"));
    }

    #[test]
    fn test_duplicate_registrations_rejected() {
        let mut builder = BotBuilder::new("unused").without_help();
        builder.register_service(Arc::new(MockService::new("irc"))).unwrap();
        assert_eq!(
            builder.register_service(Arc::new(MockService::new("irc"))).err(),
            Some(RegistryError::DuplicateService("irc".into()))
        );

        builder.register_plugin("irc", Arc::new(SimplePlugin::new("Echo"))).unwrap();
        assert!(matches!(
            builder.register_plugin("irc", Arc::new(SimplePlugin::new("Echo"))),
            Err(RegistryError::DuplicatePlugin { .. })
        ));
        // 名称区分大小写
        builder.register_plugin("irc", Arc::new(SimplePlugin::new("echo"))).unwrap();

        assert_eq!(
            builder.register_plugin("slack", Arc::new(SimplePlugin::new("Echo"))).err(),
            Some(RegistryError::UnknownService("slack".into()))
        );
    }

    #[test]
    fn test_shared_instance_across_services() {
        let shared: Arc<dyn Plugin> = Arc::new(SimplePlugin::new("Shared"));
        let mut builder = BotBuilder::new("unused").without_help();
        builder.register_service(Arc::new(MockService::new("irc"))).unwrap();
        builder.register_service(Arc::new(MockService::new("slack"))).unwrap();
        builder.register_plugin("irc", Arc::clone(&shared)).unwrap();
        builder.register_plugin("slack", Arc::clone(&shared)).unwrap();

        let bot = builder.build();
        let a = bot.plugins("irc").unwrap().get("Shared").unwrap();
        let b = bot.plugins("slack").unwrap().get("Shared").unwrap();
        assert!(Arc::ptr_eq(a, b));
    }
}
