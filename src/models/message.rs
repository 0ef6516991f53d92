use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub flat_id: String,
    pub user_id: String,
    pub user_name: String,
    pub image_uid: Option<String>,
    pub text: String,
    /// 服务端写入时间；历史数据可能缺失，排序时按 epoch 兜底
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// 指向同一房源内被回复的消息，None 表示顶层消息
    pub reply_to: Option<String>,
    #[serde(default)]
    pub read: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendMessageRequest {
    #[validate(length(min = 1, max = 10000))]
    pub text: String,

    pub reply_to: Option<String>,
}

/// 会话树节点：消息加上派生的展示信息与已展开的直接回复
#[derive(Debug, Clone, Serialize)]
pub struct ThreadNode {
    #[serde(flatten)]
    pub message: Message,
    pub avatar_url: Option<String>,
    pub reply_count: usize,
    pub can_reply: bool,
    pub expanded: bool,
    pub depth: usize,
    pub replies: Vec<ThreadNode>,
}

/// 广播到订阅方的实时消息事件
#[derive(Debug, Clone, Serialize)]
pub struct MessageEvent {
    pub flat_id: String,
    pub message: Message,
}
