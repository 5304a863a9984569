//! Full image load: memory cache, then decode or process.

use super::{
    unexpected_output, Dependency, FetchDecodedImage, Node, NodeAction, Output, ProcessImage, Stage,
    StageContext,
};
use crate::image::{CacheType, ImageResponse};
use crate::keys::{DataKey, ImageCacheKey, ProcessedKey, TaskKey};
use crate::request::ImageRequest;
use crate::task::Event;
use tracing::debug;

pub(crate) struct LoadImage {
    request: ImageRequest,
    cache_key: ImageCacheKey,
}

impl LoadImage {
    pub(crate) fn new(request: ImageRequest) -> Self {
        let cache_key = ImageCacheKey::for_request(&request);
        Self { request, cache_key }
    }

    fn dependency(&self) -> Dependency {
        if self.request.processors().is_empty() {
            Dependency {
                key: TaskKey::DecodedImage(DataKey::for_request(&self.request)),
                node: Node::FetchDecodedImage(FetchDecodedImage::new(self.request.clone())),
            }
        } else {
            Dependency {
                key: TaskKey::ProcessedImage(ProcessedKey::for_request(&self.request)),
                node: Node::ProcessImage(ProcessImage::new(self.request.clone())),
            }
        }
    }

    fn store(&self, response: &ImageResponse, cx: &StageContext<'_>) {
        if !self.request.options().memory_cache_writes {
            return;
        }
        if response.container.is_preview && !cx.env.config.store_previews_in_memory_cache() {
            return;
        }
        if let Some(cache) = &cx.env.image_cache {
            cache.insert(self.cache_key.clone(), response.container.clone());
        }
    }
}

impl Stage for LoadImage {
    fn start(&mut self, cx: &StageContext<'_>) -> Vec<NodeAction> {
        let mut actions = Vec::new();

        if self.request.options().memory_cache_reads {
            if let Some(cached) = cx.env.image_cache.as_ref().and_then(|c| c.get(&self.cache_key)) {
                let response = ImageResponse {
                    container: cached,
                    cache_type: Some(CacheType::Memory),
                    response: None,
                };
                if !response.container.is_preview {
                    debug!(key = %self.cache_key, "Memory cache hit");
                    return vec![NodeAction::Emit(Event::Completed(Output::Image(response)))];
                }
                actions.push(NodeAction::Emit(Event::Preview(Output::Image(response))));
            }
        }

        actions.push(NodeAction::Subscribe(self.dependency()));
        actions
    }

    fn on_dependency_event(&mut self, event: Event<Output>, cx: &StageContext<'_>) -> Vec<NodeAction> {
        let event = match event {
            Event::Progress(progress) => Event::Progress(progress),
            Event::Preview(Output::Image(preview)) => {
                self.store(&preview, cx);
                Event::Preview(Output::Image(preview))
            }
            Event::Completed(Output::Image(image)) => {
                self.store(&image, cx);
                Event::Completed(Output::Image(image))
            }
            Event::Failed(error) => Event::Failed(error),
            Event::Preview(Output::Data(_)) => return Vec::new(),
            Event::Completed(Output::Data(_)) => Event::Failed(unexpected_output("image")),
        };
        vec![NodeAction::Emit(event)]
    }
}
