//! Class catalog: label names and id resolution for the object detector.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;

/// The 80 COCO labels in canonical index order.
pub const COCO_LABELS: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

static COCO_INDEX: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    COCO_LABELS
        .iter()
        .enumerate()
        .map(|(id, label)| (*label, id as u32))
        .collect()
});

pub fn coco_class_id(label: &str) -> Option<u32> {
    COCO_INDEX.get(label).copied()
}

/// Resolve active class names to ascending ids.
///
/// `table` is the detector's own label table; `None` means COCO. Names not in
/// the table are ignored.
pub fn resolve_class_ids(table: Option<&[String]>, active: &BTreeSet<String>) -> Vec<u32> {
    let mut ids: Vec<u32> = match table {
        None => active.iter().filter_map(|name| coco_class_id(name)).collect(),
        Some(labels) => labels
            .iter()
            .enumerate()
            .filter(|(_, label)| active.contains(label.as_str()))
            .map(|(id, _)| id as u32)
            .collect(),
    };
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Label for `class_id`, falling back to `class <id>` when out of range.
pub fn label_for(table: Option<&[String]>, class_id: u32) -> String {
    let found = match table {
        None => COCO_LABELS.get(class_id as usize).map(|s| s.to_string()),
        Some(labels) => labels.get(class_id as usize).cloned(),
    };
    found.unwrap_or_else(|| format!("class {class_id}"))
}
