//! Graph used to turn lock ownership into deadlock cycles

pub(crate) mod wait_for_graph;

pub(crate) use wait_for_graph::WaitForGraph;
