use crate::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// 控制台适配器：把标准输入的每一行当作一条私聊消息
pub struct ConsoleAdapter {
    id: String,
    user_id: String,
    msg_seq: AtomicU64,
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self {
            id: "console-01".to_string(),
            user_id: "console_user".to_string(),
            msg_seq: AtomicU64::new(0),
        }
    }
}

impl ConsoleAdapter {
    pub const PLATFORM: &'static str = "console";
}

#[async_trait]
impl Adapter for ConsoleAdapter {
    fn id(&self) -> &str {
        &self.id
    }
    fn name(&self) -> &str {
        "Console Adapter"
    }
    fn platform(&self) -> &str {
        Self::PLATFORM
    }

    async fn start(&self, ctx: AdapterContext) -> BotResult<()> {
        let event_tx = ctx.event_tx.clone();
        let system_tx = ctx.system_tx.clone();
        let mut sys_rx = ctx.system_rx.resubscribe();
        let user_id = self.user_id.clone();

        info!(target: "Console", "已启动控制台模式。请输入指令 (例如: /天气 今日 北京)，/exit 退出");
        info!(target: "Console", "模拟环境: User ID: {} | Private", user_id);

        tokio::spawn(async move {
            let stdin = tokio::io::stdin();
            let mut reader = BufReader::new(stdin).lines();
            let mut counter = 0u64;

            loop {
                tokio::select! {
                    Ok(SystemSignal::Shutdown) = sys_rx.recv() => {
                        break;
                    }
                    line_result = reader.next_line() => {
                        match line_result {
                            Ok(Some(text)) => {
                                let content = text.trim().to_string();
                                if content.is_empty() { continue; }

                                if content == "/exit" {
                                    let _ = system_tx.send(SystemSignal::Shutdown);
                                    break;
                                }

                                counter += 1;
                                let event = Event::private_message(
                                    ConsoleAdapter::PLATFORM,
                                    user_id.as_str(),
                                    content,
                                )
                                .with_id(format!("msg_{}", counter));

                                if let Err(e) = event_tx.send(event).await {
                                    error!(target: "Console", "发送事件失败: {}", e);
                                    break;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                error!(target: "Console", "读取输入错误: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> BotResult<()> {
        Ok(())
    }

    async fn send_text(&self, target: &Target, content: &str) -> BotResult<()> {
        let seq = self.msg_seq.fetch_add(1, Ordering::Relaxed);
        println!(
            "[Bot -> {}:{}] #{}\n{}",
            target.kind(),
            target.id(),
            seq,
            content.trim()
        );
        Ok(())
    }
}
