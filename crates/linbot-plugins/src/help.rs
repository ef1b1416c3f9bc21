//! `帮助`: lists the enabled commands.

use std::sync::Arc;

use async_trait::async_trait;
use linbot_core::{
    BoxedHandler, ChatEvent, CommandCatalog, Handler, PluginDescriptor, PluginEnv, PluginGroup,
};

pub struct Help {
    catalog: CommandCatalog,
}

impl Help {
    pub fn new(catalog: CommandCatalog) -> Self {
        Self { catalog }
    }

    fn render(&self) -> String {
        let mut help = String::from("支持的命令：");
        for info in self.catalog.enabled_commands() {
            help.push('\n');
            help.push_str(&info.command);
            help.push_str(": ");
            help.push_str(&info.description);
        }
        help
    }
}

#[async_trait]
impl Handler for Help {
    fn command(&self) -> &str {
        "帮助"
    }

    fn description(&self) -> &str {
        "显示帮助信息"
    }

    async fn handle(&self, _args: &str, _event: &ChatEvent) -> anyhow::Result<Option<String>> {
        Ok(Some(self.render()))
    }
}

fn build(env: &PluginEnv) -> anyhow::Result<BoxedHandler> {
    Ok(Arc::new(Help::new(env.catalog.clone())))
}

pub static HELP: PluginDescriptor = PluginDescriptor {
    name: "help",
    build,
};

pub static GROUP: PluginGroup = PluginGroup {
    name: "help",
    plugins: &[&HELP],
};
