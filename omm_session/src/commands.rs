use omm_types::GenericMsg;
use omm_types::Handle;
use omm_types::PostMsg;
use omm_types::RequestMsg;

use crate::client::ConsumerClient;

/// Intents queued by the application thread for the dispatcher
pub enum Command {
    Register { handle: Handle, request: RequestMsg, client: Box<dyn ConsumerClient>, children: Vec<Handle> },
    Reissue { handle: Handle, request: RequestMsg },
    Unregister { handle: Handle, children: Vec<Handle> },
    /// `service_id` is set for off-stream posts submitted on a login handle
    SubmitPost { handle: Handle, post: PostMsg, service_id: Option<u16> },
    SubmitGeneric { handle: Handle, generic: GenericMsg },
    FallbackPreferredHost,
    Shutdown,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Reissue { .. } => "reissue",
            Command::Unregister { .. } => "unregister",
            Command::SubmitPost { .. } => "submit_post",
            Command::SubmitGeneric { .. } => "submit_generic",
            Command::FallbackPreferredHost => "fallback_preferred_host",
            Command::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Register { handle, children, .. } => f.debug_struct("Register").field("handle", handle).field("children", &children.len()).finish(),
            Command::Reissue { handle, .. } => f.debug_struct("Reissue").field("handle", handle).finish(),
            Command::Unregister { handle, .. } => f.debug_struct("Unregister").field("handle", handle).finish(),
            Command::SubmitPost { handle, post, service_id } => {
                f.debug_struct("SubmitPost").field("handle", handle).field("post_id", &post.post_id).field("service_id", service_id).finish()
            }
            Command::SubmitGeneric { handle, .. } => f.debug_struct("SubmitGeneric").field("handle", handle).finish(),
            Command::FallbackPreferredHost => f.write_str("FallbackPreferredHost"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}
