//! 天气指令的业务流程：查询、绑定、强制绑定、解绑、查绑。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::command::Command;
use super::provider::WeatherApi;
use super::reply;
use super::tracker::{BindStatus, BindingTracker, Confirm, ForceBind};
use super::validator::CityValidator;
use crate::Sender;
use crate::store::KvStore;

/// 用户默认城市在键值存储中的键
pub fn binding_key(user_id: &str) -> String {
    format!("weather:{}", user_id)
}

pub struct WeatherService {
    store: Arc<dyn KvStore>,
    tracker: BindingTracker,
    validator: Arc<dyn CityValidator>,
    api: Arc<dyn WeatherApi>,
}

impl WeatherService {
    pub fn new(
        store: Arc<dyn KvStore>,
        validator: Arc<dyn CityValidator>,
        api: Arc<dyn WeatherApi>,
        bind_window: Duration,
    ) -> Self {
        Self {
            store,
            tracker: BindingTracker::new(bind_window),
            validator,
            api,
        }
    }

    pub fn tracker(&self) -> &BindingTracker {
        &self.tracker
    }

    /// 执行一条指令并返回回复文本。
    ///
    /// `sender` 用于绑定请求超时后的异步通知。
    pub async fn handle(
        &self,
        user_id: &str,
        command: Command,
        sender: Arc<dyn Sender>,
    ) -> Result<String> {
        match command {
            Command::Today(city) => self.today(user_id, city).await,
            Command::FiveDay(city) => self.five_day(user_id, city).await,
            Command::Bind(None) => Ok(reply::bind_usage()),
            Command::Bind(Some(city)) => self.bind(user_id, &city, sender).await,
            Command::ForceBind(None) => Ok(reply::force_bind_usage()),
            Command::ForceBind(Some(city)) => self.force_bind(user_id, &city).await,
            Command::Unbind => self.unbind(user_id).await,
            Command::ShowBinding => self.show_binding(user_id).await,
            Command::Unknown(text) => {
                warn!(target: "Weather", "触发未知命令：{}", text);
                Ok(reply::unknown(&text))
            }
        }
    }

    /// 指令中给出的城市优先，其次是已绑定的城市
    pub async fn resolve_city(&self, user_id: &str, explicit: Option<String>) -> Result<Option<String>> {
        if explicit.is_some() {
            return Ok(explicit);
        }
        self.bound_city(user_id).await
    }

    async fn bound_city(&self, user_id: &str) -> Result<Option<String>> {
        let city = self
            .store
            .get_or(&binding_key(user_id), "")
            .await
            .context("读取绑定城市失败")?;
        Ok((!city.is_empty()).then_some(city))
    }

    async fn today(&self, user_id: &str, city: Option<String>) -> Result<String> {
        let Some(city) = self.resolve_city(user_id, city).await? else {
            return Ok(reply::need_city());
        };

        Ok(match self.api.today(&city).await {
            Ok(current) => reply::today(&current),
            Err(e) => {
                warn!(target: "Weather", city = %city, error = %e, "实时天气查询失败");
                reply::query_error(&e)
            }
        })
    }

    async fn five_day(&self, user_id: &str, city: Option<String>) -> Result<String> {
        let Some(city) = self.resolve_city(user_id, city).await? else {
            return Ok(reply::need_city());
        };

        Ok(match self.api.five_day(&city).await {
            Ok(forecast) => reply::five_day(&forecast),
            Err(e) => {
                warn!(target: "Weather", city = %city, error = %e, "五日预报查询失败");
                reply::query_error(&e)
            }
        })
    }

    /// 发起绑定：先登记待确认请求，再校验城市。
    ///
    /// 校验失败时请求保持 `Pending`，用户可在窗口内强制绑定。
    pub async fn bind(&self, user_id: &str, city: &str, sender: Arc<dyn Sender>) -> Result<String> {
        let ticket = self
            .tracker
            .start(user_id, city, move |snapshot| async move {
                if let Err(e) = sender.text(&reply::timed_out(&snapshot.city)).await {
                    warn!(target: "Weather", error = %e, "超时通知发送失败");
                }
            })
            .await;

        let validation = self.validator.validate(city).await;
        if !validation.valid {
            info!(target: "Weather", user_id, city, reason = %validation.message, "城市校验未通过，等待强制绑定");
            return Ok(reply::rejected(
                city,
                &validation.message,
                self.tracker.window(),
            ));
        }

        let key = binding_key(user_id);
        let outcome = self
            .tracker
            .confirm(user_id, ticket, async {
                self.store.set(&key, city).await
            })
            .await
            .context("保存绑定城市失败")?;

        Ok(match outcome {
            Confirm::Applied => {
                info!(target: "Weather", user_id, city, "绑定成功");
                reply::bound(city)
            }
            Confirm::Superseded => reply::superseded(city),
            Confirm::Cancelled => reply::bind_cancelled(city),
            Confirm::Expired => reply::validated_too_late(city),
            Confirm::Settled => reply::already_force_bound(city),
        })
    }

    pub async fn force_bind(&self, user_id: &str, city: &str) -> Result<String> {
        let key = binding_key(user_id);
        let result = self
            .tracker
            .force_bind(user_id, city, async {
                self.store.set(&key, city).await
            })
            .await
            .context("保存绑定城市失败")?;

        Ok(match result {
            ForceBind::Bound => {
                info!(target: "Weather", user_id, city, "强制绑定成功");
                reply::force_bound(city)
            }
            ForceBind::NoPending => reply::no_pending(),
            ForceBind::Mismatch { pending } => reply::mismatch(city, &pending),
            ForceBind::Expired { pending } => reply::expired(&pending),
        })
    }

    /// 删除绑定记录，并无条件取消待确认的请求
    pub async fn unbind(&self, user_id: &str) -> Result<String> {
        let pending = self.tracker.remove(user_id).await;
        let city = self.bound_city(user_id).await?;
        self.store
            .delete(&binding_key(user_id))
            .await
            .context("删除绑定城市失败")?;

        let mut msg = match &city {
            Some(city) => reply::unbound(city),
            None => reply::nothing_bound(),
        };
        if let Some(pending) = pending.filter(|p| p.status == BindStatus::Pending) {
            msg.push_str(&format!("\n已取消待确认的绑定请求：{}", pending.city));
        }
        Ok(msg)
    }

    pub async fn show_binding(&self, user_id: &str) -> Result<String> {
        let mut msg = match self.bound_city(user_id).await? {
            Some(city) => reply::show_bound(&city),
            None => reply::nothing_bound(),
        };

        if let Some(pending) = self.tracker.snapshot(user_id).await
            && pending.status == BindStatus::Pending
        {
            msg.push('\n');
            msg.push_str(&reply::pending_hint(&pending.city, pending.remaining()));
        }
        Ok(msg)
    }

    /// 插件卸载：取消全部定时器
    pub async fn shutdown(&self) {
        self.tracker.clear().await;
    }
}
