mod rt;
mod runtime;

fn main() {
    runtime::app::run_from_args();
}
