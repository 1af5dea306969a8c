//! OML collection config handed to the control node program with `-c`.

use crate::experiment::files::{ExpFileKind, ExperimentFiles};
use std::fmt::Write;

const STREAMS: [ExpFileKind; 4] = [
    ExpFileKind::Consumption,
    ExpFileKind::Radio,
    ExpFileKind::Event,
    ExpFileKind::Sniffer,
];

/// Render the `<omlc>` document, one `<collect>` per measurement stream.
pub fn oml_xml_config(node_id: &str, exp_id: u32, files: &ExperimentFiles) -> String {
    let mut xml = format!("<omlc id='{}' exp_id='{}'>\n", node_id, exp_id);
    for kind in STREAMS {
        let name = kind.dir_name();
        // writing to a String cannot fail
        let _ = write!(
            xml,
            "  <collect url='file:{}' encoding='text'>\n    \
             <stream name=\"{}\" mp=\"{}\" samples='1' />\n  </collect>\n",
            files.path(kind).display(),
            name,
            name
        );
    }
    xml.push_str("</omlc>");
    xml
}
