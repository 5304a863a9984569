//! Processing stage.
//!
//! Applies the request's processors, in order, to the decoded image on the
//! processing pool. Previews are processed too, one at a time, and dropped
//! while a previous preview is still being processed.

use super::{
    unexpected_output, Dependency, FetchDecodedImage, Node, NodeAction, Output, Signal, Stage,
    StageContext,
};
use crate::error::PipelineError;
use crate::image::{ImageContainer, ImageResponse};
use crate::keys::{DataKey, TaskKey};
use crate::request::ImageRequest;
use crate::task::Event;
use crate::traits::ImageProcessor;
use crate::worker::ExecutorError;
use image::DynamicImage;
use std::sync::Arc;

pub(crate) struct ProcessImage {
    request: ImageRequest,
    processing: bool,
    finished: bool,
}

impl ProcessImage {
    pub(crate) fn new(request: ImageRequest) -> Self {
        Self {
            request,
            processing: false,
            finished: false,
        }
    }

    fn process(&self, input: ImageResponse, is_final: bool, cx: &StageContext<'_>) {
        let processors: Vec<Arc<dyn ImageProcessor>> = self.request.processors().to_vec();
        let pool = cx.env.processing.clone();
        let token = cx.token.clone();
        let priority = cx.priority.subscribe();

        cx.spawn(async move {
            let source = Arc::clone(&input.container.image);
            let outcome = pool
                .run(&token, priority, move || apply_processors(&processors, &source))
                .await;
            let result = match outcome {
                Ok(Ok(image)) => Ok(ImageResponse {
                    container: ImageContainer {
                        image: Arc::new(image),
                        is_preview: !is_final,
                    },
                    cache_type: input.cache_type,
                    response: input.response,
                }),
                Ok(Err(e)) => Err(e),
                Err(ExecutorError::Cancelled) => return None,
                Err(e) => Err(PipelineError::Internal(e.to_string())),
            };
            Some(Signal::Processed { result, is_final })
        });
    }
}

fn apply_processors(
    processors: &[Arc<dyn ImageProcessor>],
    source: &DynamicImage,
) -> Result<DynamicImage, PipelineError> {
    let mut current: Option<DynamicImage> = None;
    for processor in processors {
        let input = current.as_ref().unwrap_or(source);
        current = Some(processor.process(input)?);
    }
    Ok(current.unwrap_or_else(|| source.clone()))
}

impl Stage for ProcessImage {
    fn start(&mut self, _cx: &StageContext<'_>) -> Vec<NodeAction> {
        vec![NodeAction::Subscribe(Dependency {
            key: TaskKey::DecodedImage(DataKey::for_request(&self.request)),
            node: Node::FetchDecodedImage(FetchDecodedImage::new(self.request.clone())),
        })]
    }

    fn on_dependency_event(&mut self, event: Event<Output>, cx: &StageContext<'_>) -> Vec<NodeAction> {
        match event {
            Event::Progress(progress) => vec![NodeAction::Emit(Event::Progress(progress))],
            Event::Preview(Output::Image(preview)) => {
                if !self.processing && !self.finished {
                    self.processing = true;
                    self.process(preview, false, cx);
                }
                Vec::new()
            }
            Event::Completed(Output::Image(image)) => {
                self.finished = true;
                self.process(image, true, cx);
                Vec::new()
            }
            Event::Failed(error) => vec![NodeAction::Emit(Event::Failed(error))],
            Event::Preview(Output::Data(_)) => Vec::new(),
            Event::Completed(Output::Data(_)) => {
                vec![NodeAction::Emit(Event::Failed(unexpected_output("image")))]
            }
        }
    }

    fn on_signal(&mut self, signal: Signal, _cx: &StageContext<'_>) -> Vec<NodeAction> {
        let Signal::Processed { result, is_final } = signal else {
            return Vec::new();
        };

        if is_final {
            let event = match result {
                Ok(response) => Event::Completed(Output::Image(response)),
                Err(error) => Event::Failed(error),
            };
            return vec![NodeAction::Emit(event)];
        }

        self.processing = false;
        match result {
            Ok(preview) if !self.finished => {
                vec![NodeAction::Emit(Event::Preview(Output::Image(preview)))]
            }
            _ => Vec::new(),
        }
    }
}
