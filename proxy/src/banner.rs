//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Startup banner

const BANNER: &str = r"
 _       _ _          _     _
| |_ ___| | |__  _ __(_) __| | __ _  ___
| __/ _ \ | '_ \| '__| |/ _` |/ _` |/ _ \
| ||  __/ | |_) | |  | | (_| | (_| |  __/
 \__\___|_|_.__/|_|  |_|\__,_|\__, |\___|
                              |___/

Telbridge is running...
";

/// Print the startup banner to the console
pub fn display() {
    println!("{BANNER}");
}
