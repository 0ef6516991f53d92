use serde::{Deserialize, Serialize};

use crate::models::message::Message;

/// 派生通知：未读且非本人发送的消息，附上房源展示名。不落库，
/// 每次快照事件重建，确认后立刻从内存集合移除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub message: Message,
    pub flat_name: String,
}

/// 聚合器的生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Idle,
    LoadingFlats,
    Subscribed,
}

/// 推送给已连接客户端的聚合快照
#[derive(Debug, Clone, Serialize)]
pub struct FeedEvent {
    pub entries: Vec<Notification>,
}
