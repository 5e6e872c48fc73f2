mod openai;

pub use openai::{
    classify_line, handle_openai_stream, SnapshotAccumulator, SnapshotSink, SseLine, SseLineBuffer,
};
