//! In-memory device tree for unit tests.

use std::string::{String, ToString};
use std::vec::Vec;

use super::DeviceTree;

struct TestNode {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
    props: Vec<(String, Vec<u8>)>,
}

pub(crate) struct TestTree {
    nodes: Vec<TestNode>,
}

impl TestTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![TestNode {
                name: String::new(),
                parent: None,
                children: Vec::new(),
                props: Vec::new(),
            }],
        }
    }

    pub(crate) fn root_id(&self) -> usize {
        0
    }

    pub(crate) fn add(&mut self, parent: usize, name: &str) -> usize {
        let id = self.nodes.len();
        self.nodes.push(TestNode {
            name: name.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            props: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    pub(crate) fn bytes(&mut self, node: usize, name: &str, value: &[u8]) {
        self.nodes[node].props.push((name.to_string(), value.to_vec()));
    }

    pub(crate) fn cells(&mut self, node: usize, name: &str, cells: &[u32]) {
        let value: Vec<u8> = cells.iter().flat_map(|c| c.to_be_bytes()).collect();
        self.bytes(node, name, &value);
    }

    pub(crate) fn string(&mut self, node: usize, name: &str, value: &str) {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.bytes(node, name, &bytes);
    }
}

impl DeviceTree for TestTree {
    type Node = usize;

    fn root(&self) -> usize {
        0
    }

    fn name(&self, node: &usize) -> &str {
        &self.nodes[*node].name
    }

    fn property(&self, node: &usize, name: &str) -> Option<&[u8]> {
        self.nodes[*node]
            .props
            .iter()
            .find(|(prop, _)| prop == name)
            .map(|(_, value)| value.as_slice())
    }

    fn parent(&self, node: &usize) -> Option<usize> {
        self.nodes[*node].parent
    }

    fn children(&self, node: &usize) -> impl Iterator<Item = usize> {
        self.nodes[*node].children.iter().copied()
    }
}
