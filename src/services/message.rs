use crate::{
    config::Config,
    error::{AppError, Result},
    models::flat::Flat,
    models::message::*,
    models::user::User,
    services::{Database, MediaService},
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

/// 房源消息服务：持久化消息并向每个房源的订阅方广播事件。
/// 会话树与回复权限是消息集合上的纯函数。
#[derive(Clone)]
pub struct MessageService {
    db: Arc<Database>,
    media: MediaService,
    config: Config,
    // 每个房源一个广播通道，没有订阅者时在发布路径上回收
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<MessageEvent>>>>,
}

impl MessageService {
    pub async fn new(db: Arc<Database>, media: MediaService, config: &Config) -> Result<Self> {
        Ok(Self {
            db,
            media,
            config: config.clone(),
            channels: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// 发送消息；reply_to 必须指向同一房源内已存在的消息
    pub async fn send_message(
        &self,
        flat_id: &str,
        author: &User,
        request: SendMessageRequest,
    ) -> Result<Message> {
        debug!("Creating message for flat: {}", flat_id);

        request.validate().map_err(AppError::ValidatorError)?;

        if request.text.trim().is_empty() {
            return Err(AppError::validation("Message text must not be empty"));
        }
        if request.text.len() > self.config.max_message_length {
            return Err(AppError::validation("Message text is too long"));
        }

        let flat: Option<Flat> = self.db.get_by_id("flat", flat_id).await?;
        if flat.is_none() {
            return Err(AppError::not_found("Flat"));
        }

        if let Some(parent_id) = &request.reply_to {
            let parent: Option<Message> = self.db.get_by_id("message", parent_id).await?;
            match parent {
                Some(parent) if parent.flat_id == flat_id => {}
                Some(_) => {
                    return Err(AppError::validation(
                        "Replied message belongs to another flat",
                    ))
                }
                None => return Err(AppError::NotFound("Parent message not found".to_string())),
            }
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            flat_id: flat_id.to_string(),
            user_id: author.id.clone(),
            user_name: author.full_name(),
            image_uid: author.image_uid.clone(),
            text: request.text,
            created_at: Some(Utc::now()),
            reply_to: request.reply_to,
            read: false,
        };

        let created: Message = self.db.create("message", message).await?;

        self.publish(MessageEvent {
            flat_id: flat_id.to_string(),
            message: created.clone(),
        });

        Ok(created)
    }

    /// 房源的全部消息，按创建时间倒序
    pub async fn get_flat_messages(&self, flat_id: &str) -> Result<Vec<Message>> {
        let query = r#"
            SELECT * FROM message
            WHERE flat_id = $flat_id
            ORDER BY created_at DESC
        "#;

        let mut response = self
            .db
            .query_with_params(query, serde_json::json!({ "flat_id": flat_id }))
            .await?;
        let messages: Vec<Message> = response.take(0)?;
        Ok(messages)
    }

    /// 最近 N 条消息，通知聚合器用
    pub async fn recent_messages(&self, flat_id: &str, limit: usize) -> Result<Vec<Message>> {
        let query = r#"
            SELECT * FROM message
            WHERE flat_id = $flat_id
            ORDER BY created_at DESC
            LIMIT $limit
        "#;

        let mut response = self
            .db
            .query_with_params(query, serde_json::json!({ "flat_id": flat_id, "limit": limit }))
            .await?;
        let messages: Vec<Message> = response.take(0)?;
        Ok(messages)
    }

    /// 组装会话树视图
    pub async fn get_thread(
        &self,
        flat_id: &str,
        viewer: Option<&User>,
        expanded: &HashSet<String>,
    ) -> Result<Vec<ThreadNode>> {
        let flat: Flat = self
            .db
            .get_by_id("flat", flat_id)
            .await?
            .ok_or_else(|| AppError::not_found("Flat"))?;

        let messages = self.get_flat_messages(flat_id).await?;
        Ok(build_thread(
            &messages,
            expanded,
            viewer,
            &flat.owner_id,
            &self.media,
        ))
    }

    /// 订阅一个房源的消息事件；丢弃接收端即取消订阅
    pub fn subscribe(&self, flat_id: &str) -> broadcast::Receiver<MessageEvent> {
        let mut channels = self.channels.write().unwrap();
        channels
            .entry(flat_id.to_string())
            .or_insert_with(|| {
                info!("Opening message channel for flat: {}", flat_id);
                broadcast::channel(256).0
            })
            .subscribe()
    }

    fn publish(&self, event: MessageEvent) {
        let mut channels = self.channels.write().unwrap();
        let stale = match channels.get(&event.flat_id) {
            Some(tx) => tx.send(event.clone()).is_err(),
            None => false,
        };
        if stale {
            // 最后一个订阅者已离开
            channels.remove(&event.flat_id);
        }
    }
}

/// 缺失时间戳按 epoch 兜底的排序键
pub fn creation_sort_key(message: &Message) -> DateTime<Utc> {
    message.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// 顶层消息，最新的在前
pub fn top_level_messages(messages: &[Message]) -> Vec<&Message> {
    let mut top: Vec<&Message> = messages.iter().filter(|m| m.reply_to.is_none()).collect();
    top.sort_by(|a, b| creation_sort_key(b).cmp(&creation_sort_key(a)));
    top
}

/// 某条消息的直接回复，按会话阅读顺序（最旧的在前）
pub fn direct_replies<'a>(messages: &'a [Message], parent_id: &str) -> Vec<&'a Message> {
    let mut replies: Vec<&Message> = messages
        .iter()
        .filter(|m| m.reply_to.as_deref() == Some(parent_id))
        .collect();
    replies.sort_by(|a, b| creation_sort_key(a).cmp(&creation_sort_key(b)));
    replies
}

/// 直接回复数，不含孙子回复
pub fn direct_reply_count(messages: &[Message], message_id: &str) -> usize {
    messages
        .iter()
        .filter(|m| m.reply_to.as_deref() == Some(message_id))
        .count()
}

/// 回复权限：
/// - 未登录一律拒绝
/// - 房源业主可以回复任何消息
/// - 顶层消息只有作者本人可以回复
/// - 回复消息需要是被回复那条消息的作者；父消息不在集合内时拒绝
pub fn can_reply(
    viewer: Option<&User>,
    message: &Message,
    messages: &[Message],
    flat_owner_id: &str,
) -> bool {
    let Some(viewer) = viewer else {
        return false;
    };
    if viewer.id.is_empty() {
        return false;
    }

    if viewer.id == flat_owner_id {
        return true;
    }

    match &message.reply_to {
        None => message.user_id == viewer.id,
        Some(parent_id) => messages
            .iter()
            .find(|m| &m.id == parent_id)
            .map(|parent| parent.user_id == viewer.id)
            .unwrap_or(false),
    }
}

/// 由扁平消息集合构造会话树。展开集合之外的节点保持折叠，
/// 展开的节点递归展开其直接回复。
pub fn build_thread(
    messages: &[Message],
    expanded: &HashSet<String>,
    viewer: Option<&User>,
    flat_owner_id: &str,
    media: &MediaService,
) -> Vec<ThreadNode> {
    top_level_messages(messages)
        .into_iter()
        .map(|m| build_node(messages, m, expanded, viewer, flat_owner_id, media, 0))
        .collect()
}

fn build_node(
    messages: &[Message],
    message: &Message,
    expanded: &HashSet<String>,
    viewer: Option<&User>,
    flat_owner_id: &str,
    media: &MediaService,
    depth: usize,
) -> ThreadNode {
    let reply_count = direct_reply_count(messages, &message.id);
    let is_expanded = expanded.contains(&message.id);

    let replies = if is_expanded {
        direct_replies(messages, &message.id)
            .into_iter()
            .map(|r| build_node(messages, r, expanded, viewer, flat_owner_id, media, depth + 1))
            .collect()
    } else {
        Vec::new()
    };

    ThreadNode {
        avatar_url: media.resolve(message.image_uid.as_deref()),
        can_reply: can_reply(viewer, message, messages, flat_owner_id),
        message: message.clone(),
        reply_count,
        expanded: is_expanded,
        depth,
        replies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(seconds: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(seconds, 0).unwrap())
    }

    fn msg(id: &str, user_id: &str, reply_to: Option<&str>, seconds: Option<i64>) -> Message {
        Message {
            id: id.to_string(),
            flat_id: "flat-1".to_string(),
            user_id: user_id.to_string(),
            user_name: user_id.to_uppercase(),
            image_uid: None,
            text: format!("mensaje {}", id),
            created_at: seconds.and_then(ts),
            reply_to: reply_to.map(|p| p.to_string()),
            read: false,
        }
    }

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{}@example.com", id),
            first_name: id.to_string(),
            last_name: "Test".to_string(),
            role: Default::default(),
            birth_date: None,
            image_uid: None,
            favorites: Vec::new(),
            password_hash: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn media() -> MediaService {
        std::env::set_var("JWT_SECRET", "test-secret");
        let config = crate::config::Config::from_env().unwrap();
        tokio_test::block_on(MediaService::new(&config)).unwrap()
    }

    #[test]
    fn top_level_is_newest_first_replies_oldest_first() {
        let messages = vec![
            msg("m1", "u2", None, Some(100)),
            msg("m2", "u3", None, Some(200)),
            msg("r1", "u3", Some("m1"), Some(300)),
            msg("r2", "u2", Some("m1"), Some(150)),
        ];

        let top = top_level_messages(&messages);
        assert_eq!(
            top.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m2", "m1"]
        );

        let replies = direct_replies(&messages, "m1");
        assert_eq!(
            replies.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["r2", "r1"]
        );
    }

    #[test]
    fn missing_timestamp_sorts_lowest() {
        let messages = vec![
            msg("old", "u1", None, None),
            msg("new", "u1", None, Some(10)),
        ];
        let top = top_level_messages(&messages);
        assert_eq!(top[0].id, "new");
        assert_eq!(top[1].id, "old");
    }

    #[test]
    fn reply_count_is_direct_only_and_zero_when_fresh() {
        let messages = vec![
            msg("m1", "u2", None, Some(1)),
            msg("r1", "u3", Some("m1"), Some(2)),
            msg("rr1", "u2", Some("r1"), Some(3)),
            msg("fresh", "u4", None, Some(4)),
        ];
        assert_eq!(direct_reply_count(&messages, "m1"), 1);
        assert_eq!(direct_reply_count(&messages, "r1"), 1);
        assert_eq!(direct_reply_count(&messages, "fresh"), 0);
    }

    #[test]
    fn reply_authorization_matrix() {
        // 业主 u1，顶层 m1 由 u2 发出，r1 是 u3 对 m1 的回复
        let messages = vec![
            msg("m1", "u2", None, Some(1)),
            msg("r1", "u3", Some("m1"), Some(2)),
        ];
        let owner = user("u1");
        let u2 = user("u2");
        let u3 = user("u3");

        let m1 = &messages[0];
        let r1 = &messages[1];

        // 业主对任何消息都可以回复
        assert!(can_reply(Some(&owner), m1, &messages, "u1"));
        assert!(can_reply(Some(&owner), r1, &messages, "u1"));

        // 顶层消息只有作者本人可以继续
        assert!(can_reply(Some(&u2), m1, &messages, "u1"));
        assert!(!can_reply(Some(&u3), m1, &messages, "u1"));

        // 对 r1 的回复权属于 m1 的作者 u2，而不是 r1 的作者 u3
        assert!(can_reply(Some(&u2), r1, &messages, "u1"));
        assert!(!can_reply(Some(&u3), r1, &messages, "u1"));

        // 未登录一律拒绝
        assert!(!can_reply(None, m1, &messages, "u1"));
    }

    #[test]
    fn missing_parent_fails_closed() {
        let orphan = msg("r9", "u2", Some("gone"), Some(5));
        let messages = vec![orphan.clone()];
        let u2 = user("u2");
        assert!(!can_reply(Some(&u2), &orphan, &messages, "u1"));
    }

    #[test]
    fn thread_collapsed_by_default_and_expands_recursively() {
        let messages = vec![
            msg("m1", "u2", None, Some(1)),
            msg("r1", "u3", Some("m1"), Some(2)),
            msg("rr1", "u2", Some("r1"), Some(3)),
        ];
        let media = media();

        let collapsed = build_thread(&messages, &HashSet::new(), None, "u1", &media);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].reply_count, 1);
        assert!(collapsed[0].replies.is_empty());

        let mut expanded = HashSet::new();
        expanded.insert("m1".to_string());
        expanded.insert("r1".to_string());
        let tree = build_thread(&messages, &expanded, None, "u1", &media);
        assert_eq!(tree[0].replies.len(), 1);
        assert_eq!(tree[0].replies[0].message.id, "r1");
        assert_eq!(tree[0].replies[0].depth, 1);
        assert_eq!(tree[0].replies[0].replies.len(), 1);
        assert_eq!(tree[0].replies[0].replies[0].message.id, "rr1");
        assert_eq!(tree[0].replies[0].replies[0].depth, 2);
    }

    fn node_count(nodes: &[ThreadNode]) -> usize {
        nodes.iter().map(|n| 1 + node_count(&n.replies)).sum()
    }

    proptest! {
        // 任意合法的回复森林在全部展开时恰好覆盖每条消息一次
        #[test]
        fn fully_expanded_thread_covers_every_message(raw in prop::collection::vec((0usize..40, any::<bool>(), 0i64..1000), 0..40)) {
            let mut messages: Vec<Message> = Vec::new();
            for (i, (parent, has_parent, seconds)) in raw.iter().enumerate() {
                let reply_to = if *has_parent && *parent < i {
                    Some(format!("m{}", parent))
                } else {
                    None
                };
                messages.push(Message {
                    id: format!("m{}", i),
                    flat_id: "flat-1".to_string(),
                    user_id: "u1".to_string(),
                    user_name: "U1".to_string(),
                    image_uid: None,
                    text: "x".to_string(),
                    created_at: Some(Utc.timestamp_opt(*seconds, 0).unwrap()),
                    reply_to,
                    read: false,
                });
            }

            let expanded: HashSet<String> = messages.iter().map(|m| m.id.clone()).collect();
            let media = media();
            let tree = build_thread(&messages, &expanded, None, "owner", &media);
            prop_assert_eq!(node_count(&tree), messages.len());
        }

        // 顶层排序时间不增，同一父节点下的回复时间不减
        #[test]
        fn orderings_are_monotonic(raw in prop::collection::vec((0usize..20, any::<bool>(), 0i64..1000), 0..30)) {
            let mut messages: Vec<Message> = Vec::new();
            for (i, (parent, has_parent, seconds)) in raw.iter().enumerate() {
                let reply_to = if *has_parent && *parent < i {
                    Some(format!("m{}", parent))
                } else {
                    None
                };
                let mut m = msg(&format!("m{}", i), "u1", None, Some(*seconds));
                m.reply_to = reply_to;
                messages.push(m);
            }

            let top = top_level_messages(&messages);
            for pair in top.windows(2) {
                prop_assert!(creation_sort_key(pair[0]) >= creation_sort_key(pair[1]));
            }

            for m in &messages {
                let replies = direct_replies(&messages, &m.id);
                for pair in replies.windows(2) {
                    prop_assert!(creation_sort_key(pair[0]) <= creation_sort_key(pair[1]));
                }
            }
        }
    }
}
