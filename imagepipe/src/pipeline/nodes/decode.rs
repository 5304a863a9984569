//! Decoding stage.
//!
//! Subscribes to the original data and decodes it on the decoding pool.
//! With progressive decoding enabled, partial data is decoded into previews
//! whenever the previous partial decode has finished. Partial decode
//! failures are ignored; the final decode decides the outcome.

use super::{
    unexpected_output, Dependency, FetchOriginalData, Node, NodeAction, Output, Signal, Stage,
    StageContext,
};
use crate::error::PipelineError;
use crate::image::{CacheType, ImageContainer, ImageResponse, ResponseInfo};
use crate::keys::{DataKey, TaskKey};
use crate::request::ImageRequest;
use crate::task::Event;
use crate::worker::ExecutorError;
use bytes::Bytes;
use std::sync::Arc;
use tracing::trace;

pub(crate) struct FetchDecodedImage {
    request: ImageRequest,
    decoding: bool,
    finished: bool,
    cache_type: Option<CacheType>,
    response: Option<ResponseInfo>,
}

impl FetchDecodedImage {
    pub(crate) fn new(request: ImageRequest) -> Self {
        Self {
            request,
            decoding: false,
            finished: false,
            cache_type: None,
            response: None,
        }
    }

    fn decode(&self, data: Bytes, is_final: bool, cx: &StageContext<'_>) {
        let decoder = Arc::clone(&cx.env.decoder);
        let pool = cx.env.decoding.clone();
        let token = cx.token.clone();
        let priority = cx.priority.subscribe();

        cx.spawn(async move {
            let result = match pool
                .run(&token, priority, move || decoder.decode(&data, is_final))
                .await
            {
                Ok(decoded) => decoded.map_err(PipelineError::from),
                Err(ExecutorError::Cancelled) => return None,
                Err(e) => Err(PipelineError::Internal(e.to_string())),
            };
            Some(Signal::Decoded { result, is_final })
        });
    }
}

impl Stage for FetchDecodedImage {
    fn start(&mut self, _cx: &StageContext<'_>) -> Vec<NodeAction> {
        vec![NodeAction::Subscribe(Dependency {
            key: TaskKey::OriginalData(DataKey::for_request(&self.request)),
            node: Node::FetchOriginalData(FetchOriginalData::new(self.request.clone())),
        })]
    }

    fn on_dependency_event(&mut self, event: Event<Output>, cx: &StageContext<'_>) -> Vec<NodeAction> {
        match event {
            Event::Progress(progress) => vec![NodeAction::Emit(Event::Progress(progress))],
            Event::Preview(Output::Data(partial)) => {
                if self.decoding || self.finished || !cx.env.config.progressive_decoding() {
                    return Vec::new();
                }
                self.decoding = true;
                self.response = partial.response;
                self.decode(partial.data, false, cx);
                Vec::new()
            }
            Event::Completed(Output::Data(data)) => {
                self.finished = true;
                self.cache_type = data.cache_type;
                self.response = data.response;
                self.decode(data.data, true, cx);
                Vec::new()
            }
            Event::Failed(error) => vec![NodeAction::Emit(Event::Failed(error))],
            Event::Preview(Output::Image(_)) => Vec::new(),
            Event::Completed(Output::Image(_)) => {
                vec![NodeAction::Emit(Event::Failed(unexpected_output("data")))]
            }
        }
    }

    fn on_signal(&mut self, signal: Signal, _cx: &StageContext<'_>) -> Vec<NodeAction> {
        let Signal::Decoded { result, is_final } = signal else {
            return Vec::new();
        };

        if is_final {
            let event = match result {
                Ok(image) => Event::Completed(Output::Image(ImageResponse {
                    container: ImageContainer::new(image),
                    cache_type: self.cache_type,
                    response: self.response.clone(),
                })),
                Err(error) => Event::Failed(error),
            };
            return vec![NodeAction::Emit(event)];
        }

        self.decoding = false;
        match result {
            Ok(image) if !self.finished => vec![NodeAction::Emit(Event::Preview(Output::Image(
                ImageResponse {
                    container: ImageContainer::preview(image),
                    cache_type: None,
                    response: self.response.clone(),
                },
            )))],
            Ok(_) => Vec::new(),
            Err(error) => {
                trace!(url = self.request.url(), error = %error, "Partial decode failed");
                Vec::new()
            }
        }
    }
}
