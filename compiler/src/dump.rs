// dump.rs - Text dumps of the logical and physical models
//
// Renders the replicated composite tree and the placed physical model as
// indented text for diagnostics. Output is deterministic: children follow
// declaration order and maps are walked in index order.
//
// Preconditions: `logical` has been loaded (any later stage is fine);
//                `physical` has been built.
// Postconditions: returns the complete dump text.
// Failure modes: a dangling index in the model → `Internal`.
// Side effects: none.

use std::fmt::Write;

use crate::diag::{Result, TransformError};
use crate::id::OperIdx;
use crate::model::{LogicalModel, ModelConnection, OperatorBody};
use crate::physical::{PhysicalModel, PhysicalOperator};

const INDENT: &str = "  ";

fn fmt_err(_: std::fmt::Error) -> TransformError {
    TransformError::internal("failed to format model dump")
}

fn pad(depth: usize) -> String {
    INDENT.repeat(depth)
}

fn conns(list: &[ModelConnection]) -> String {
    let parts: Vec<String> = list.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

// ── Logical model ───────────────────────────────────────────────────────────

/// Indented rendering of the composite tree rooted at the main composite.
pub fn logical_model(model: &LogicalModel) -> Result<String> {
    let mut buf = String::new();
    writeln!(buf, "logical model").map_err(fmt_err)?;
    write_operator(&mut buf, model, model.main, 1)?;
    Ok(buf)
}

fn write_operator(buf: &mut String, model: &LogicalModel, idx: OperIdx, depth: usize) -> Result<()> {
    let op = model.operator(idx)?;
    let p = pad(depth);
    write!(buf, "{p}{} {} \"{}\"", op.kind_name(), op.index, model.name(idx)?).map_err(fmt_err)?;
    if op.is_replica {
        write!(buf, " replica").map_err(fmt_err)?;
    }
    if let Some(region) = op.parallel_region {
        write!(buf, " region={} channel={}", region, op.channel).map_err(fmt_err)?;
    }
    if let Some(cc) = op.cc() {
        if !cc.oblivious {
            write!(buf, " cc={:?}", cc.regions.iter().map(|r| r.0).collect::<Vec<_>>())
                .map_err(fmt_err)?;
        }
    }
    writeln!(buf).map_err(fmt_err)?;

    let q = pad(depth + 1);
    match &op.body {
        OperatorBody::Composite(c) => {
            for port in &c.inputs {
                writeln!(buf, "{q}in {} incoming={} outgoing={}", port.index, conns(&port.incoming), conns(&port.outgoing))
                    .map_err(fmt_err)?;
            }
            for port in &c.outputs {
                writeln!(buf, "{q}out {} incoming={} outgoing={}", port.index, conns(&port.incoming), conns(&port.outgoing))
                    .map_err(fmt_err)?;
            }
            for &child in c.primitives.iter().chain(&c.composites) {
                write_operator(buf, model, child, depth + 1)?;
            }
        }
        OperatorBody::Primitive(prim) => {
            writeln!(buf, "{q}physical={} logical={}", prim.physical_index, prim.logical_index)
                .map_err(fmt_err)?;
            for port in &prim.inputs {
                writeln!(buf, "{q}in {} {}", port.index, conns(&port.connections)).map_err(fmt_err)?;
            }
            for port in &prim.outputs {
                writeln!(buf, "{q}out {} {}", port.index, conns(&port.connections)).map_err(fmt_err)?;
            }
        }
        OperatorBody::Splitter(s) => {
            writeln!(buf, "{q}in 0 {}", conns(&s.input)).map_err(fmt_err)?;
            for (i, list) in s.outputs.iter().enumerate() {
                writeln!(buf, "{q}out {} {}", i, conns(list)).map_err(fmt_err)?;
            }
        }
        OperatorBody::Merger(m) => {
            for (i, list) in m.inputs.iter().enumerate() {
                writeln!(buf, "{q}in {} {}", i, conns(list)).map_err(fmt_err)?;
            }
            writeln!(buf, "{q}out 0 {}", conns(&m.output)).map_err(fmt_err)?;
        }
        OperatorBody::Import(i) => {
            for port in &i.outputs {
                writeln!(buf, "{q}out {} {}", port.index, conns(&port.connections)).map_err(fmt_err)?;
            }
        }
        OperatorBody::Export(e) => {
            for port in &e.inputs {
                writeln!(buf, "{q}in {} {}", port.index, conns(&port.connections)).map_err(fmt_err)?;
            }
        }
    }
    Ok(())
}

// ── Physical model ──────────────────────────────────────────────────────────

/// PEs with their ports, then every physical operator.
pub fn physical_model(model: &PhysicalModel) -> Result<String> {
    let mut buf = String::new();
    writeln!(buf, "physical model").map_err(fmt_err)?;
    for pe in model.pes.values() {
        write!(buf, "{INDENT}pe {} logical={}", pe.index, pe.logical_index).map_err(fmt_err)?;
        if let Some((region, channel)) = pe.region {
            write!(buf, " region={} channel={}", region, channel).map_err(fmt_err)?;
        }
        let ops: Vec<String> = pe.operators.iter().map(ToString::to_string).collect();
        writeln!(buf, " operators=[{}]", ops.join(", ")).map_err(fmt_err)?;
        for port in &pe.inputs {
            let sc: Vec<String> = port.static_connections.iter().map(|s| format!("{}:{}", s.pe, s.port)).collect();
            writeln!(
                buf,
                "{INDENT}{INDENT}in {} oper={}:{} static=[{}]",
                port.index,
                port.oper,
                port.oper_port,
                sc.join(", ")
            )
            .map_err(fmt_err)?;
        }
        for port in &pe.outputs {
            let sc: Vec<String> = port.static_connections.iter().map(|s| format!("{}:{}", s.pe, s.port)).collect();
            write!(buf, "{INDENT}{INDENT}out {} oper={}:{}", port.index, port.oper, port.oper_port)
                .map_err(fmt_err)?;
            if let Some((s, c)) = port.splitter {
                write!(buf, " splitter={} channel={}", s, c).map_err(fmt_err)?;
            }
            writeln!(buf, " static=[{}]", sc.join(", ")).map_err(fmt_err)?;
        }
    }
    for op in model.operators.values() {
        write_physical_operator(&mut buf, op)?;
    }
    Ok(buf)
}

fn write_physical_operator(buf: &mut String, op: &PhysicalOperator) -> Result<()> {
    let pe = op.owning_pe.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
    write!(buf, "{INDENT}oper {} \"{}\" logical={} pe={}", op.index, op.name, op.logical_index, pe)
        .map_err(fmt_err)?;
    if op.is_replica {
        write!(buf, " replica").map_err(fmt_err)?;
    }
    if op.colocation_constraint {
        write!(buf, " colocated").map_err(fmt_err)?;
    }
    writeln!(
        buf,
        " singleThreaded={}/{}",
        op.single_threaded_on_inputs, op.single_threaded_on_outputs
    )
    .map_err(fmt_err)?;

    let d2 = pad(2);
    let d3 = pad(3);
    for port in &op.inputs {
        write!(buf, "{d2}in {}", port.index).map_err(fmt_err)?;
        if port.has_injected_thread {
            write!(buf, " injected").map_err(fmt_err)?;
        } else if port.threaded_port.is_some() {
            write!(buf, " threaded").map_err(fmt_err)?;
        }
        writeln!(buf).map_err(fmt_err)?;
        for conn in &port.connections {
            writeln!(buf, "{d3}{}", conn).map_err(fmt_err)?;
        }
    }
    for port in &op.outputs {
        writeln!(buf, "{d2}out {} stream=\"{}\"", port.index, port.stream_name).map_err(fmt_err)?;
        for conn in &port.connections {
            writeln!(buf, "{d3}{}", conn).map_err(fmt_err)?;
        }
        for splitter in &port.splitters {
            writeln!(
                buf,
                "{d3}splitter {} iport={} region={}",
                splitter.index, splitter.iport, splitter.region
            )
            .map_err(fmt_err)?;
            for channel in &splitter.channels {
                writeln!(buf, "{d3}{INDENT}channel {}", channel.index).map_err(fmt_err)?;
                for conn in &channel.connections {
                    writeln!(buf, "{d3}{INDENT}{INDENT}{}", conn).map_err(fmt_err)?;
                }
            }
        }
    }
    Ok(())
}
