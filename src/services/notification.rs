use crate::{
    config::Config,
    error::{AppError, Result},
    models::message::Message,
    models::notification::*,
    services::{Database, MessageService},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::services::message::creation_sort_key;

/// 通知聚合器：给业主一条跨所有名下房源的未读消息流。
///
/// 每个活跃用户一份 feed：idle -> loading_flats -> subscribed。
/// 进入 subscribed 后每个名下房源挂一个监听任务，事件到达时
/// 只重算该房源的切片，再整体按时间倒序。登出、房源集合变化
/// 或闲置回收时，所有监听句柄必须全部取消，不允许泄漏。
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<Database>,
    messages: MessageService,
    config: Config,
    feeds: Arc<RwLock<HashMap<String, UserFeed>>>,
}

struct UserFeed {
    state: FeedState,
    listeners: HashMap<String, FlatListener>,
    entries: Vec<Notification>,
    events: broadcast::Sender<FeedEvent>,
    last_active: DateTime<Utc>,
}

/// 单个房源订阅的可取消句柄
struct FlatListener {
    flat_id: String,
    task: JoinHandle<()>,
}

impl FlatListener {
    fn unsubscribe(self) {
        debug!("Unsubscribing listener for flat: {}", self.flat_id);
        self.task.abort();
    }
}

impl Drop for FlatListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FlatRef {
    id: String,
    street_name: Option<String>,
}

impl NotificationService {
    pub async fn new(db: Arc<Database>, messages: MessageService, config: &Config) -> Result<Self> {
        Ok(Self {
            db,
            messages,
            config: config.clone(),
            feeds: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// 打开（或触达）一个用户的通知 feed
    pub async fn ensure_feed(&self, user_id: &str) -> Result<()> {
        {
            let mut feeds = self.feeds.write().await;
            if let Some(feed) = feeds.get_mut(user_id) {
                feed.last_active = Utc::now();
                return Ok(());
            }

            info!("Opening notification feed for user: {}", user_id);
            let (events, _) = broadcast::channel(64);
            feeds.insert(
                user_id.to_string(),
                UserFeed {
                    state: FeedState::LoadingFlats,
                    listeners: HashMap::new(),
                    entries: Vec::new(),
                    events,
                    last_active: Utc::now(),
                },
            );
        }

        self.attach_listeners(user_id).await
    }

    /// 房源集合变化后重建订阅；没有活跃 feed 时是空操作
    pub async fn rebuild_feed_if_active(&self, user_id: &str) -> Result<()> {
        {
            let mut feeds = self.feeds.write().await;
            let Some(feed) = feeds.get_mut(user_id) else {
                return Ok(());
            };
            debug!("Rebuilding notification feed for user: {}", user_id);
            feed.state = FeedState::LoadingFlats;
            feed.entries.clear();
            for (_, listener) in feed.listeners.drain() {
                listener.unsubscribe();
            }
        }

        self.attach_listeners(user_id).await
    }

    /// 关闭 feed 并释放所有监听句柄（登出 / 会话结束）
    pub async fn stop_feed(&self, user_id: &str) {
        let mut feeds = self.feeds.write().await;
        if let Some(mut feed) = feeds.remove(user_id) {
            info!("Closing notification feed for user: {}", user_id);
            for (_, listener) in feed.listeners.drain() {
                listener.unsubscribe();
            }
        }
    }

    pub async fn feed_state(&self, user_id: &str) -> FeedState {
        self.feeds
            .read()
            .await
            .get(user_id)
            .map(|feed| feed.state)
            .unwrap_or(FeedState::Idle)
    }

    /// 当前聚合内容；角标数量即集合大小
    pub async fn feed_entries(&self, user_id: &str) -> Vec<Notification> {
        self.feeds
            .read()
            .await
            .get(user_id)
            .map(|feed| feed.entries.clone())
            .unwrap_or_default()
    }

    /// 订阅 feed 的实时事件
    pub async fn subscribe_feed(&self, user_id: &str) -> Option<broadcast::Receiver<FeedEvent>> {
        self.feeds
            .read()
            .await
            .get(user_id)
            .map(|feed| feed.events.subscribe())
    }

    /// 确认一条通知：本地立即移除，落库标记已读不等待确认，
    /// 返回房源ID供调用方跳转。
    pub async fn acknowledge(&self, user_id: &str, message_id: &str) -> Result<String> {
        let removed = {
            let mut feeds = self.feeds.write().await;
            let feed = feeds
                .get_mut(user_id)
                .ok_or_else(|| AppError::not_found("Notification feed"))?;

            let removed = remove_entry(&mut feed.entries, message_id)
                .ok_or_else(|| AppError::not_found("Notification"))?;

            let _ = feed.events.send(FeedEvent {
                entries: feed.entries.clone(),
            });
            removed
        };

        self.commit_optimistic(message_id);

        Ok(removed.message.flat_id)
    }

    /// 回收既无连接又长时间未触达的 feed
    pub async fn prune_idle_feeds(&self) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.feed_sweep_interval as i64);
        let mut feeds = self.feeds.write().await;
        feeds.retain(|user_id, feed| {
            let keep = feed.events.receiver_count() > 0 || feed.last_active > cutoff;
            if !keep {
                info!("Releasing idle notification feed for user: {}", user_id);
            }
            keep
        });
        Ok(())
    }

    /// 乐观更新策略集中在这一个地方：本地已先行移除，
    /// 持久化失败只记录日志，不回滚本地状态。
    fn commit_optimistic(&self, message_id: &str) {
        let db = self.db.clone();
        let message_id = message_id.to_string();
        tokio::spawn(async move {
            let updates = json!({ "read": true });
            if let Err(e) = db
                .update_by_id_with_json::<serde_json::Value>("message", &message_id, updates)
                .await
            {
                error!("Failed to persist read flag for message {}: {}", message_id, e);
            }
        });
    }

    async fn attach_listeners(&self, user_id: &str) -> Result<()> {
        let flats = self.owned_flats(user_id).await?;
        debug!("User {} owns {} flats", user_id, flats.len());

        let mut listeners = HashMap::new();
        for flat in flats {
            listeners.insert(flat.id.clone(), self.spawn_flat_listener(user_id, flat));
        }

        let mut feeds = self.feeds.write().await;
        match feeds.get_mut(user_id) {
            Some(feed) => {
                feed.listeners = listeners;
                feed.state = FeedState::Subscribed;
            }
            None => {
                // feed 在装载期间被关闭，丢弃句柄即取消任务
                debug!("Feed for user {} was closed while loading", user_id);
            }
        }
        Ok(())
    }

    fn spawn_flat_listener(&self, user_id: &str, flat: FlatRef) -> FlatListener {
        let mut rx = self.messages.subscribe(&flat.id);
        let messages = self.messages.clone();
        let feeds = self.feeds.clone();
        let limit = self.config.notification_feed_limit;
        let viewer_id = user_id.to_string();
        let flat_id = flat.id.clone();
        let flat_name = flat
            .street_name
            .clone()
            .unwrap_or_else(|| "Unknown Flat".to_string());

        let task = tokio::spawn(async move {
            loop {
                if let Err(e) =
                    refresh_flat_slice(&messages, &feeds, &viewer_id, &flat_id, &flat_name, limit)
                        .await
                {
                    warn!("Failed to refresh notifications for flat {}: {}", flat_id, e);
                }

                match rx.recv().await {
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Notification listener lagged by {} events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        FlatListener {
            flat_id: flat.id,
            task,
        }
    }

    async fn owned_flats(&self, user_id: &str) -> Result<Vec<FlatRef>> {
        let query = r#"
            SELECT type::string(id) AS id, street_name FROM flat
            WHERE owner_id = $user_id
        "#;
        let mut response = self
            .db
            .query_with_params(query, json!({ "user_id": user_id }))
            .await?;
        let flats: Vec<FlatRef> = response.take(0)?;
        Ok(flats)
    }
}

/// 监听任务每次事件都重算一个房源的切片并合入聚合
async fn refresh_flat_slice(
    messages: &MessageService,
    feeds: &Arc<RwLock<HashMap<String, UserFeed>>>,
    viewer_id: &str,
    flat_id: &str,
    flat_name: &str,
    limit: usize,
) -> Result<()> {
    let recent = messages.recent_messages(flat_id, limit).await?;
    let slice = candidate_notifications(&recent, viewer_id, flat_name);

    let mut feeds = feeds.write().await;
    if let Some(feed) = feeds.get_mut(viewer_id) {
        merge_flat_slice(&mut feed.entries, flat_id, slice);
        let _ = feed.events.send(FeedEvent {
            entries: feed.entries.clone(),
        });
    }
    Ok(())
}

/// 候选集：未读且不是本人发出的消息
fn candidate_notifications(messages: &[Message], viewer_id: &str, flat_name: &str) -> Vec<Notification> {
    messages
        .iter()
        .filter(|m| m.user_id != viewer_id && !m.read)
        .map(|m| Notification {
            message: m.clone(),
            flat_name: flat_name.to_string(),
        })
        .collect()
}

/// 只替换一个房源的切片，其余房源的条目保持不动，然后整体倒序
fn merge_flat_slice(entries: &mut Vec<Notification>, flat_id: &str, slice: Vec<Notification>) {
    entries.retain(|n| n.message.flat_id != flat_id);
    entries.extend(slice);
    entries.sort_by(|a, b| creation_sort_key(&b.message).cmp(&creation_sort_key(&a.message)));
}

fn remove_entry(entries: &mut Vec<Notification>, message_id: &str) -> Option<Notification> {
    let index = entries.iter().position(|n| n.message.id == message_id)?;
    Some(entries.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, flat_id: &str, user_id: &str, seconds: i64, read: bool) -> Message {
        Message {
            id: id.to_string(),
            flat_id: flat_id.to_string(),
            user_id: user_id.to_string(),
            user_name: user_id.to_uppercase(),
            image_uid: None,
            text: format!("mensaje {}", id),
            created_at: Some(Utc.timestamp_opt(seconds, 0).unwrap()),
            reply_to: None,
            read,
        }
    }

    #[test]
    fn candidates_exclude_own_and_read_messages() {
        let messages = vec![
            msg("a", "f1", "viewer", 10, false),
            msg("b", "f1", "other", 20, false),
            msg("c", "f1", "other", 30, true),
        ];
        let candidates = candidate_notifications(&messages, "viewer", "Av. Amazonas");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].message.id, "b");
        assert_eq!(candidates[0].flat_name, "Av. Amazonas");
        assert!(candidates.iter().all(|n| n.message.user_id != "viewer"));
    }

    #[test]
    fn merge_replaces_only_that_flats_slice() {
        let mut entries = candidate_notifications(
            &[msg("a", "f1", "other", 10, false), msg("b", "f2", "other", 20, false)],
            "viewer",
            "x",
        );
        assert_eq!(entries.len(), 2);

        // f1 的快照换成了另一条消息，f2 的切片原样保留
        let slice = candidate_notifications(&[msg("c", "f1", "other", 30, false)], "viewer", "x");
        merge_flat_slice(&mut entries, "f1", slice);

        let ids: Vec<&str> = entries.iter().map(|n| n.message.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn aggregate_is_sorted_descending_by_creation() {
        let mut entries = Vec::new();
        merge_flat_slice(
            &mut entries,
            "f1",
            candidate_notifications(&[msg("a", "f1", "o", 10, false)], "v", "x"),
        );
        merge_flat_slice(
            &mut entries,
            "f2",
            candidate_notifications(&[msg("b", "f2", "o", 30, false)], "v", "x"),
        );
        merge_flat_slice(
            &mut entries,
            "f3",
            candidate_notifications(&[msg("c", "f3", "o", 20, false)], "v", "x"),
        );

        let ids: Vec<&str> = entries.iter().map(|n| n.message.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn remove_entry_takes_exactly_one() {
        let mut entries = candidate_notifications(
            &[
                msg("a", "f1", "o", 10, false),
                msg("b", "f1", "o", 20, false),
                msg("c", "f2", "o", 30, false),
            ],
            "v",
            "x",
        );

        let removed = remove_entry(&mut entries, "b").unwrap();
        assert_eq!(removed.message.id, "b");
        assert_eq!(entries.len(), 2);
        // 其它房源的条目不受影响
        assert!(entries.iter().any(|n| n.message.id == "c"));

        assert!(remove_entry(&mut entries, "b").is_none());
    }
}
