//! Raw data load. Depends only on the original data stage.

use super::{unexpected_output, Dependency, FetchOriginalData, Node, NodeAction, Output, Stage, StageContext};
use crate::keys::{DataKey, TaskKey};
use crate::request::ImageRequest;
use crate::task::Event;

pub(crate) struct LoadData {
    request: ImageRequest,
}

impl LoadData {
    pub(crate) fn new(request: ImageRequest) -> Self {
        Self { request }
    }
}

impl Stage for LoadData {
    fn start(&mut self, _cx: &StageContext<'_>) -> Vec<NodeAction> {
        vec![NodeAction::Subscribe(Dependency {
            key: TaskKey::OriginalData(DataKey::for_request(&self.request)),
            node: Node::FetchOriginalData(FetchOriginalData::new(self.request.clone())),
        })]
    }

    fn on_dependency_event(&mut self, event: Event<Output>, _cx: &StageContext<'_>) -> Vec<NodeAction> {
        let event = match event {
            Event::Progress(progress) => Event::Progress(progress),
            // Partial data is only useful to the decoder.
            Event::Preview(_) => return Vec::new(),
            Event::Completed(Output::Data(data)) => Event::Completed(Output::Data(data)),
            Event::Completed(Output::Image(_)) => Event::Failed(unexpected_output("data")),
            Event::Failed(error) => Event::Failed(error),
        };
        vec![NodeAction::Emit(event)]
    }
}
