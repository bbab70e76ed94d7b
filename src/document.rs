//! Typed client-side proxy for one engine document instance

use crate::bridge::protocol::{METHOD_DELETE, METHOD_GET_PDF_BUFFER, METHOD_LOAD_PDF, METHOD_NEW};
use crate::bridge::{BridgeError, CallChannel, Handle, PendingReply, Transport, Value};
use crate::engine::{LayoutConfigs, Location, PageSize, methods, properties};

/// Handle of a document instance living on the engine side
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoteDocument {
    handle: Handle,
}

impl RemoteDocument {
    /// Ask the engine for a fresh instance
    pub fn create<T: Transport>(channel: &mut CallChannel<T>) -> Result<Self, BridgeError> {
        let reply = channel.invoke(METHOD_NEW, vec![]);
        let value = channel.wait(reply)?;
        Handle::from_value(&value)
            .map(|handle| Self { handle })
            .ok_or_else(|| BridgeError::Decode(format!("not a handle: {value:?}")))
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    fn with_handle(&self, mut params: Vec<Value>) -> Vec<Value> {
        params.insert(0, self.handle.into());
        params
    }

    fn invoke<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        method: &str,
        params: Vec<Value>,
    ) -> PendingReply {
        channel.invoke(method, self.with_handle(params))
    }

    fn property<T: Transport>(&self, channel: &mut CallChannel<T>, name: &str) -> PendingReply {
        channel.property(name, self.with_handle(vec![]))
    }

    /// Destroy the instance and release its document buffer
    pub fn delete<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.invoke(channel, METHOD_DELETE, vec![])
    }

    /// Hand the document bytes over to the engine. They are moved, not copied.
    pub fn load_pdf<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        bytes: Vec<u8>,
        configs: &LayoutConfigs,
    ) -> Result<PendingReply, BridgeError> {
        let configs = Value::encode(configs)?;
        Ok(self.invoke(channel, METHOD_LOAD_PDF, vec![Value::Binary(bytes), configs]))
    }

    pub fn page_count<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.property(channel, properties::PAGE_COUNT)
    }

    pub fn page_size<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        page: usize,
    ) -> PendingReply {
        self.invoke(channel, methods::PAGE_SIZE, vec![page.into()])
    }

    pub fn all_page_sizes<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.invoke(channel, methods::GET_ALL_PAGE_SIZES, vec![])
    }

    /// Rasterize a page to `size` pixels; `background` of -1 keeps the page's own
    pub fn page_image<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        page: usize,
        background: i64,
        size: PageSize,
    ) -> Result<PendingReply, BridgeError> {
        let size = Value::encode(&size)?;
        Ok(self.invoke(
            channel,
            methods::GET_PAGE_IMAGE,
            vec![page.into(), background.into(), size],
        ))
    }

    pub fn markables<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        page: usize,
    ) -> PendingReply {
        self.invoke(channel, methods::GET_MARKABLES, vec![page.into()])
    }

    pub fn doc_info<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        page: usize,
    ) -> PendingReply {
        self.invoke(channel, methods::GET_PDF_DOC_INFO, vec![page.into()])
    }

    pub fn page_label<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        page: usize,
    ) -> PendingReply {
        self.invoke(channel, methods::PAGE_LABEL, vec![page.into()])
    }

    /// 1-based page number for `label`, 0 when unknown
    pub fn page_no_by_label<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        label: &str,
    ) -> PendingReply {
        self.invoke(channel, methods::PAGE_NO_BY_LABEL, vec![label.into()])
    }

    pub fn set_configs<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        configs: &LayoutConfigs,
    ) -> Result<PendingReply, BridgeError> {
        let configs = Value::encode(configs)?;
        Ok(self.invoke(channel, methods::SET_CONFIGS, vec![configs]))
    }

    pub fn set_current_sentence<T: Transport>(
        &self,
        channel: &mut CallChannel<T>,
        page: i32,
        par: i32,
        snt: i32,
        location: Location,
    ) -> PendingReply {
        self.invoke(
            channel,
            methods::SET_CURRENT_SENTENCE,
            vec![page.into(), par.into(), snt.into(), location.code().into()],
        )
    }

    pub fn next_sentence<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.invoke(channel, methods::GOTO_NEXT_SENTENCE, vec![])
    }

    pub fn prev_sentence<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.invoke(channel, methods::GOTO_PREV_SENTENCE, vec![])
    }

    pub fn sentence_content<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.invoke(channel, methods::GET_SENTENCE_CONTENT, vec![])
    }

    pub fn sentence_page<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.property(channel, properties::SENTENCE_VIRTUAL_PAGE_IDX)
    }

    pub fn sentence_real_page<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.property(channel, properties::SENTENCE_REAL_PAGE_IDX)
    }

    pub fn sentence_paragraph<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.property(channel, properties::SENTENCE_PAR_IDX)
    }

    pub fn sentence_index<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.property(channel, properties::SENTENCE_IDX)
    }

    /// The document bytes as held by the engine
    pub fn pdf_buffer<T: Transport>(&self, channel: &mut CallChannel<T>) -> PendingReply {
        self.invoke(channel, METHOD_GET_PDF_BUFFER, vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::CallId;
    use crate::test_utils::LoopbackTransport;

    #[test]
    fn instance_calls_lead_with_the_handle() {
        let (transport, peer) = LoopbackTransport::new();
        let mut channel = CallChannel::new(transport);
        let doc = RemoteDocument {
            handle: Handle(4),
        };

        let _ = doc.page_size(&mut channel, 2);
        let _ = doc.page_count(&mut channel);

        let posted = peer.posted();
        assert_eq!(posted[0].method, "pageSize");
        assert_eq!(posted[0].params, vec![Value::from(4_u32), Value::from(2_usize)]);
        assert!(!posted[0].is_property);
        assert_eq!(posted[1].method, "PageCount");
        assert!(posted[1].is_property);
        assert_eq!(posted[1].params.len(), 1);
    }

    #[test]
    fn create_reads_the_handle_reply() {
        let (transport, peer) = LoopbackTransport::new();
        let mut channel = CallChannel::new(transport);
        peer.reply_ok(CallId(0), Value::from(9_u32));
        let doc = RemoteDocument::create(&mut channel).unwrap();
        assert_eq!(doc.handle(), Handle(9));
    }

    #[test]
    fn load_moves_bytes_into_the_call() {
        let (transport, peer) = LoopbackTransport::new();
        let mut channel = CallChannel::new(transport);
        let doc = RemoteDocument {
            handle: Handle(1),
        };
        let _ = doc.load_pdf(&mut channel, vec![1, 2, 3], &LayoutConfigs::default());
        let posted = peer.posted();
        assert_eq!(posted[0].params[1], Value::Binary(vec![1, 2, 3]));
        assert!(posted[0].params[2].field("ASCIIOffset").is_some());
    }
}
