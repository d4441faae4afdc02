use std::env;
use std::process::ExitCode;

use demitasse::{Value, Vm};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let [class_path, class, method, rest @ ..] = args.as_slice() else {
        eprintln!("usage: demi <classpath> <class> <method> [int args...]");
        return ExitCode::FAILURE;
    };

    let call_args: Vec<Value> = rest
        .iter()
        .map(|arg| match arg.parse::<i32>() {
            Ok(v) => Value::Int(v),
            Err(_) => Value::from(arg.as_str()),
        })
        .collect();

    let vm = Vm::new([class_path.as_str()]);
    vm.register_native("Runtime", "log", "(Ljava/lang/String;)V", |args| {
        let line: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        println!("{}", line.join(" "));
        Ok(None)
    });

    match vm.call(class, method, &call_args) {
        Ok(value) => {
            println!("{value}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
